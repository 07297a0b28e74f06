//! Org directory sync: download, extract, swap with backup and rollback.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::archive::{extract_entry, PartialFile};
use super::fs::{SyncFs, TokioFs};
use crate::common::ClientError;
use crate::transfer::download::stream_to_file;
use crate::transport::{Client, RequestTimer};

const SYNC_LABEL: &str = "org-sync";

/// The four paths one sync juggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    pub archive: PathBuf,
    pub extracted: PathBuf,
    pub primary: PathBuf,
    pub backup: PathBuf,
}

impl SyncPaths {
    /// `<dir>/<file>`, `<dir>/<file>.bak`, `<dir>/<file>.new` and
    /// `<dir>/<stem>.zip`.
    pub fn in_dir(dir: impl AsRef<Path>, file_name: &str) -> Self {
        let dir = dir.as_ref();
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());

        Self {
            archive: dir.join(format!("{stem}.zip")),
            extracted: dir.join(format!("{file_name}.new")),
            primary: dir.join(file_name),
            backup: dir.join(format!("{file_name}.bak")),
        }
    }

    fn primary_name(&self) -> String {
        self.primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Downloading,
    Extracting,
    Swapping,
    /// New primary in place, archive removed.
    Committed,
    /// The swap failed and the previous primary was restored.
    RolledBack,
    /// Failed before the swap began; the primary was never touched.
    Aborted,
    /// The rollback itself failed. Manual recovery from the backup is needed.
    Unrecoverable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub primary: PathBuf,
    pub archive_bytes: u64,
    pub extracted_bytes: u64,
    /// Whether a previous primary was moved to the backup path.
    pub replaced_existing: bool,
}

/// Keeps one local directory database in step with the server.
///
/// Syncs on the same engine run one at a time.
pub struct DirectorySync<F: SyncFs = TokioFs> {
    client: Client,
    paths: SyncPaths,
    fs: F,
    timeout: Duration,
    settle_delay: Duration,
    phase: Arc<RwLock<SyncPhase>>,
    gate: Mutex<()>,
}

impl DirectorySync<TokioFs> {
    /// Engine for the database named in the client's `org_sync` settings.
    pub fn from_config(client: Client) -> Self {
        let settings = &client.config().org_sync;
        let paths = SyncPaths::in_dir(&settings.db_dir, &settings.db_file_name);
        Self::new(client, paths)
    }

    pub fn new(client: Client, paths: SyncPaths) -> Self {
        Self::with_fs(client, paths, TokioFs)
    }
}

impl<F: SyncFs> DirectorySync<F> {
    pub fn with_fs(client: Client, paths: SyncPaths, fs: F) -> Self {
        let timeout = client.config().http.archive_timeout();
        let settle_delay = client.config().org_sync.settle_delay();
        Self {
            client,
            paths,
            fs,
            timeout,
            settle_delay,
            phase: Arc::new(RwLock::new(SyncPhase::Idle)),
            gate: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    /// Phase of the running sync, or the terminal phase of the last one.
    pub fn phase(&self) -> SyncPhase {
        match self.phase.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        tracing::debug!(?phase, "org sync phase");
        match self.phase.write() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => {
                tracing::error!("Sync phase lock poisoned during write, recovering");
                *poisoned.into_inner() = phase;
            }
        }
    }

    /// Download the archive at `url` and make its database the primary.
    pub async fn sync(&self, url: &str) -> Result<SyncReport, ClientError> {
        let _exclusive = self.gate.lock().await;
        tracing::info!(url, primary = %self.paths.primary.display(), "org sync started");

        let mut archive_guard = PartialFile::new(&self.paths.archive);

        self.set_phase(SyncPhase::Downloading);
        let archive_bytes = match self.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.abort(e)),
        };

        self.set_phase(SyncPhase::Extracting);
        let extracted_bytes = match extract_entry(
            &self.paths.archive,
            &self.paths.extracted,
            &self.paths.primary_name(),
        )
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.abort(e)),
        };

        // From here the archive is removed by the swap, not the guard.
        archive_guard.disarm();

        self.set_phase(SyncPhase::Swapping);
        let replaced_existing = self.swap().await?;

        self.set_phase(SyncPhase::Committed);
        tracing::info!(
            archive_bytes,
            extracted_bytes,
            replaced_existing,
            "org sync committed"
        );

        Ok(SyncReport {
            primary: self.paths.primary.clone(),
            archive_bytes,
            extracted_bytes,
            replaced_existing,
        })
    }

    fn abort(&self, err: ClientError) -> ClientError {
        self.set_phase(SyncPhase::Aborted);
        tracing::warn!(error = %err, "org sync aborted before swap");
        err
    }

    async fn download(&self, url: &str) -> Result<u64, ClientError> {
        let session = self.client.session().snapshot();
        session.ensure_ready()?;

        if let Some(dir) = self.paths.archive.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ClientError::filesystem(dir, e))?;
        }

        let request = self.client.http().get(url).timeout(self.timeout);
        let request = self.client.with_cookies(request, &session);

        let mut timer = RequestTimer::start();
        let response = self.client.dispatch(request, SYNC_LABEL, None, &timer).await?;
        timer.mark_headers();

        let status = response.status().as_u16();
        if status != 200 {
            timer.finish().log(SYNC_LABEL, None, Some(status), false);
            return Err(ClientError::Transport {
                operation: SYNC_LABEL.to_string(),
                tid: None,
                status: Some(status),
                message: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("")
                    .to_string(),
            });
        }

        // Returns only once the archive is flushed, synced and closed.
        let written = stream_to_file(response, &self.paths.archive, SYNC_LABEL, |_| {}).await;
        timer
            .finish()
            .log(SYNC_LABEL, None, Some(status), written.is_ok());
        let written = written?;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        Ok(written)
    }

    /// Returns whether a previous primary was moved aside.
    async fn swap(&self) -> Result<bool, ClientError> {
        let paths = &self.paths;

        if self.fs.exists(&paths.backup).await {
            if let Err(e) = self.fs.remove_file(&paths.backup).await {
                self.discard_candidates().await;
                return Err(self.abort(ClientError::filesystem(&paths.backup, e)));
            }
        }

        let had_primary = self.fs.exists(&paths.primary).await;
        if had_primary {
            if let Err(e) = self.fs.rename(&paths.primary, &paths.backup).await {
                self.discard_candidates().await;
                return Err(self.abort(ClientError::filesystem(&paths.primary, e)));
            }
        }

        if let Err(e) = self.fs.rename(&paths.extracted, &paths.primary).await {
            let original = ClientError::filesystem(&paths.primary, e);
            return Err(self.roll_back(had_primary, original).await);
        }

        if let Err(e) = self.fs.remove_file(&paths.archive).await {
            tracing::warn!(
                path = %paths.archive.display(),
                error = %e,
                "failed to remove org archive after commit"
            );
        }

        Ok(had_primary)
    }

    async fn roll_back(&self, had_primary: bool, original: ClientError) -> ClientError {
        let paths = &self.paths;

        if had_primary {
            if let Err(e) = self.fs.rename(&paths.backup, &paths.primary).await {
                self.set_phase(SyncPhase::Unrecoverable);
                tracing::error!(
                    error = %original,
                    rollback_error = %e,
                    backup = %paths.backup.display(),
                    "org sync rollback failed"
                );
                return ClientError::RollbackFailed {
                    primary: paths.primary.clone(),
                    backup: paths.backup.clone(),
                    source: e,
                };
            }
        }

        self.discard_candidates().await;
        self.set_phase(SyncPhase::RolledBack);
        tracing::warn!(error = %original, "org sync rolled back");
        original
    }

    /// Best-effort removal of the extracted file and the archive.
    async fn discard_candidates(&self) {
        for path in [&self.paths.extracted, &self.paths.archive] {
            if self.fs.exists(path).await {
                if let Err(e) = self.fs.remove_file(path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove sync file");
                }
            }
        }
    }
}
