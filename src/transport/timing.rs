//! Per-request timing captured around the exchange.

use std::time::{Duration, Instant};

/// Phases observable from outside the connection pool.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimings {
    /// Request dispatch until response headers arrived.
    pub wait: Option<Duration>,
    /// Response headers until the body was fully read.
    pub download: Option<Duration>,
    pub total: Duration,
}

#[derive(Debug)]
pub struct RequestTimer {
    started: Instant,
    headers_at: Option<Instant>,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            headers_at: None,
        }
    }

    pub fn mark_headers(&mut self) {
        self.headers_at = Some(Instant::now());
    }

    pub fn finish(&self) -> RequestTimings {
        let now = Instant::now();
        RequestTimings {
            wait: self.headers_at.map(|at| at - self.started),
            download: self.headers_at.map(|at| now - at),
            total: now - self.started,
        }
    }
}

fn millis(d: Option<Duration>) -> Option<u64> {
    d.map(|d| d.as_millis() as u64)
}

impl RequestTimings {
    /// One line per exchange, success or not.
    pub fn log(&self, operation: &str, tid: Option<&str>, status: Option<u16>, success: bool) {
        if success {
            tracing::info!(
                operation,
                tid = tid.unwrap_or("-"),
                status,
                wait_ms = millis(self.wait),
                download_ms = millis(self.download),
                total_ms = self.total.as_millis() as u64,
                "[RESPONSE] ok"
            );
        } else {
            tracing::warn!(
                operation,
                tid = tid.unwrap_or("-"),
                status,
                wait_ms = millis(self.wait),
                download_ms = millis(self.download),
                total_ms = self.total.as_millis() as u64,
                "[RESPONSE] failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_absent_until_headers_seen() {
        let timer = RequestTimer::start();
        let timings = timer.finish();
        assert!(timings.wait.is_none());
        assert!(timings.download.is_none());
    }

    #[test]
    fn phases_sum_to_total() {
        let mut timer = RequestTimer::start();
        std::thread::sleep(Duration::from_millis(2));
        timer.mark_headers();
        let timings = timer.finish();

        let wait = timings.wait.unwrap();
        let download = timings.download.unwrap();
        assert!(wait >= Duration::from_millis(2));
        assert!(wait + download <= timings.total + Duration::from_millis(1));
    }
}
