//! Attachment download to disk or as base64.

use std::path::{Path, PathBuf};

use base64::Engine;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::common::{ClientError, SessionState};
use crate::protocol::Operation;
use crate::transport::{Client, RequestTimer};

/// Image size selector for thumbnails.
pub const THUMBNAIL_SIZE: &str = "thum";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub file_id: String,
    pub file_sn: String,
    /// 800 for chat rooms, 810 for notes.
    pub path_seq: String,
    /// Empty for the original file, [`THUMBNAIL_SIZE`] for a thumbnail.
    pub img_size_type: String,
    /// Document conversion view (`document.html`, `hview.html`) or empty.
    pub html_view: String,
}

impl DownloadRequest {
    pub fn new(
        file_id: impl Into<String>,
        file_sn: impl Into<String>,
        path_seq: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_sn: file_sn.into(),
            path_seq: path_seq.into(),
            ..Default::default()
        }
    }

    pub fn thumbnail(
        file_id: impl Into<String>,
        file_sn: impl Into<String>,
        path_seq: impl Into<String>,
    ) -> Self {
        Self {
            img_size_type: THUMBNAIL_SIZE.to_string(),
            ..Self::new(file_id, file_sn, path_seq)
        }
    }

    pub fn with_html_view(mut self, view: impl Into<String>) -> Self {
        self.html_view = view.into();
        self
    }

    fn params(&self, session: &SessionState) -> [(&'static str, String); 7] {
        [
            ("fileId", self.file_id.clone()),
            ("fileSn", self.file_sn.clone()),
            ("pathSeq", self.path_seq.clone()),
            ("token", session.auth_token.clone()),
            ("mobileId", session.mobile_id.clone()),
            ("imgSizeType", self.img_size_type.clone()),
            ("htmlView", self.html_view.clone()),
        ]
    }
}

/// Where downloaded bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    File(PathBuf),
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downloaded {
    File { path: PathBuf, bytes: u64 },
    Base64(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub transferred: u64,
    /// From `Content-Length`, when the server sent one.
    pub total: Option<u64>,
    pub percent: Option<f64>,
}

impl DownloadProgress {
    fn new(transferred: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t == 0 {
                1.0
            } else {
                (transferred as f64 / t as f64).min(1.0)
            }
        });
        Self {
            transferred,
            total,
            percent,
        }
    }
}

impl Client {
    /// Query string form of a download, for handing to a browser or viewer.
    pub fn download_query(&self, request: &DownloadRequest) -> String {
        let session = self.session().snapshot();
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.params(&session))
            .finish()
    }

    /// Download an attachment. Files are flushed and synced before this
    /// returns; a failed download removes the partial file.
    pub async fn download<F>(
        &self,
        request: &DownloadRequest,
        target: DownloadTarget,
        mut on_progress: F,
    ) -> Result<Downloaded, ClientError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        let url = self.resolve(Operation::AttachFileDownload)?;
        let session = self.session().snapshot();
        session.ensure_ready()?;

        let label = Operation::AttachFileDownload.to_string();
        let http_request = self
            .http()
            .post(&url)
            .timeout(self.config().http.archive_timeout())
            .form(&request.params(&session));
        let http_request = self.with_cookies(http_request, &session);

        let mut timer = RequestTimer::start();
        let response = self.dispatch(http_request, &label, None, &timer).await?;
        timer.mark_headers();

        let status = response.status().as_u16();
        if status != 200 {
            timer.finish().log(&label, None, Some(status), false);
            return Err(ClientError::Transport {
                operation: label,
                tid: None,
                status: Some(status),
                message: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("")
                    .to_string(),
            });
        }

        let total = response.content_length();
        let result = match target {
            DownloadTarget::File(path) => {
                let written = stream_to_file(response, &path, &label, |n| {
                    on_progress(DownloadProgress::new(n, total))
                })
                .await;
                match written {
                    Ok(bytes) => Ok(Downloaded::File { path, bytes }),
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&path).await;
                        Err(e)
                    }
                }
            }
            DownloadTarget::Base64 => {
                let mut body = Vec::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| ClientError::Transport {
                        operation: label.clone(),
                        tid: None,
                        status: Some(status),
                        message: e.to_string(),
                    })?;
                    body.extend_from_slice(&chunk);
                    on_progress(DownloadProgress::new(body.len() as u64, total));
                }
                Ok(Downloaded::Base64(
                    base64::engine::general_purpose::STANDARD.encode(&body),
                ))
            }
        };

        timer
            .finish()
            .log(&label, None, Some(status), result.is_ok());
        result
    }
}

/// Stream a response body into `path`, reporting cumulative bytes. The file
/// is flushed, synced and closed before returning.
pub(crate) async fn stream_to_file<P>(
    response: reqwest::Response,
    path: &Path,
    label: &str,
    mut on_chunk: P,
) -> Result<u64, ClientError>
where
    P: FnMut(u64),
{
    let status = response.status().as_u16();
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ClientError::filesystem(path, e))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ClientError::Transport {
            operation: label.to_string(),
            tid: None,
            status: Some(status),
            message: e.to_string(),
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ClientError::filesystem(path, e))?;
        written += chunk.len() as u64;
        on_chunk(written);
    }

    file.flush()
        .await
        .map_err(|e| ClientError::filesystem(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| ClientError::filesystem(path, e))?;
    drop(file);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ClientConfig, SessionStore};
    use crate::protocol::ProtocolRegistry;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one response that claims a huge body and sends three bytes.
    async fn truncated_body_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let body_len: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + body_len {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000000000000\r\n\r\nabc")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{addr}/download")
    }

    async fn client_for(url: String) -> Client {
        let client = client();
        client.install_registry(ProtocolRegistry::new(HashMap::from([(
            Operation::AttachFileDownload.pid().to_string(),
            url,
        )])));
        client
    }

    fn assert_truncated(err: ClientError) {
        match err {
            ClientError::Transport { operation, .. } => {
                assert_eq!(operation, Operation::AttachFileDownload.to_string());
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_content_length_is_a_transport_error() {
        let client = client_for(truncated_body_server().await).await;
        let err = client
            .download(
                &DownloadRequest::new("F1", "0", "800"),
                DownloadTarget::Base64,
                |_| {},
            )
            .await
            .unwrap_err();
        assert_truncated(err);
    }

    #[tokio::test]
    async fn truncated_file_download_names_the_operation() {
        let client = client_for(truncated_body_server().await).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let err = client
            .download(
                &DownloadRequest::new("F1", "0", "800"),
                DownloadTarget::File(path.clone()),
                |_| {},
            )
            .await
            .unwrap_err();
        assert_truncated(err);
        assert!(!path.exists());
    }

    fn client() -> Client {
        let mut state = SessionState::new("dev-1", "13", "03");
        state.auth_token = "tok en".to_string();
        Client::with_session(ClientConfig::default(), SessionStore::new(state)).unwrap()
    }

    #[test]
    fn query_string_carries_session_identity() {
        let request = DownloadRequest::new("F1", "0", "800").with_html_view("hview.html");
        assert_eq!(
            client().download_query(&request),
            "fileId=F1&fileSn=0&pathSeq=800&token=tok+en&mobileId=dev-1&imgSizeType=&htmlView=hview.html"
        );
    }

    #[test]
    fn thumbnail_selects_small_image() {
        let request = DownloadRequest::thumbnail("F1", "2", "810");
        assert_eq!(request.img_size_type, "thum");
        assert!(request.html_view.is_empty());
    }

    #[test]
    fn progress_percent_needs_known_length() {
        assert_eq!(DownloadProgress::new(10, None).percent, None);
        assert_eq!(DownloadProgress::new(5, Some(10)).percent, Some(0.5));
        assert_eq!(DownloadProgress::new(0, Some(0)).percent, Some(1.0));
    }
}
