//! Multipart attachment upload with per-file progress.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde_json::Value;
use tokio_util::io::ReaderStream;

use super::progress::{FileEntry, ProgressEvent, UploadProgressTracker};
use crate::common::ClientError;
use crate::protocol::Operation;
use crate::transport::Client;
use crate::utils::security::{display_name, upload_file_name};

/// A local file and the name the server should store it under.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: PathBuf,
    /// Defaults to the last path component.
    pub name: Option<String>,
}

impl UploadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
    /// 800 for chat rooms, 810 for notes.
    pub path_seq: String,
    pub file_id: String,
    pub room_id: String,
}

struct PreparedFile {
    path: PathBuf,
    name: String,
    size: u64,
}

type SharedProgress<F> = Arc<Mutex<(UploadProgressTracker, F)>>;

impl Client {
    /// Upload every file in one multipart body. `on_progress` sees one event
    /// per chunk read from disk, in body order.
    pub async fn upload<F>(&self, request: &UploadRequest, on_progress: F) -> Result<Value, ClientError>
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        if request.files.is_empty() {
            return Err(ClientError::UploadValidation(
                "upload needs at least one file".to_string(),
            ));
        }

        let url = self.resolve(Operation::AttachFileUpload)?;
        let session = self.session().snapshot();
        session.ensure_ready()?;

        let prepared = prepare_files(&request.files).await?;
        let tracker = UploadProgressTracker::new(
            prepared
                .iter()
                .map(|f| FileEntry::new(f.path.clone(), f.size))
                .collect(),
        )?;
        let total_bytes = tracker.total_bytes();
        let shared: SharedProgress<F> = Arc::new(Mutex::new((tracker, on_progress)));
        let counter = Arc::new(AtomicU64::new(0));

        let emp_seq = session
            .login_info
            .as_ref()
            .map(|info| info.emp_seq.clone())
            .unwrap_or_default();

        let mut form = Form::new()
            .text("pathSeq", request.path_seq.clone())
            .text("fileId", request.file_id.clone())
            .text("contentType", "1")
            .text("roomId", request.room_id.clone())
            .text("empSeq", emp_seq)
            .text("token", session.auth_token.clone());

        for (i, file) in prepared.into_iter().enumerate() {
            let part = file_part(file, counter.clone(), shared.clone()).await?;
            form = form.part(format!("file{i}"), part);
        }

        tracing::info!(
            files = request.files.len(),
            total_bytes,
            room_id = %request.room_id,
            "uploading attachments"
        );

        let label = Operation::AttachFileUpload.to_string();
        let http_request = self
            .http()
            .post(&url)
            .timeout(self.config().http.archive_timeout())
            .multipart(form);
        let http_request = self.with_cookies(http_request, &session);

        self.exchange(http_request, &label, None).await
    }
}

async fn prepare_files(files: &[UploadFile]) -> Result<Vec<PreparedFile>, ClientError> {
    let mut prepared = Vec::with_capacity(files.len());

    for file in files {
        let raw_name = match &file.name {
            Some(name) => name.clone(),
            None => display_name(&file.path).ok_or_else(|| {
                ClientError::UploadValidation(format!("{} has no file name", file.path.display()))
            })?,
        };
        let name = upload_file_name(&raw_name)
            .map_err(|e| ClientError::UploadValidation(format!("{raw_name:?}: {e}")))?;

        let metadata = tokio::fs::metadata(&file.path)
            .await
            .map_err(|e| ClientError::filesystem(&file.path, e))?;
        if !metadata.is_file() {
            return Err(ClientError::UploadValidation(format!(
                "{} is not a regular file",
                file.path.display()
            )));
        }

        prepared.push(PreparedFile {
            path: file.path.clone(),
            name,
            size: metadata.len(),
        });
    }

    Ok(prepared)
}

async fn file_part<F>(
    file: PreparedFile,
    counter: Arc<AtomicU64>,
    shared: SharedProgress<F>,
) -> Result<Part, ClientError>
where
    F: FnMut(ProgressEvent) + Send + 'static,
{
    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(|e| ClientError::filesystem(&file.path, e))?;

    let stream = ReaderStream::new(handle).inspect_ok(move |chunk| {
        let len = chunk.len() as u64;
        let total = counter.fetch_add(len, Ordering::SeqCst) + len;

        let mut guard = match shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Upload progress lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let (tracker, callback) = &mut *guard;
        let event = tracker.on_progress(total);
        callback(event);
    });

    Ok(Part::stream_with_length(Body::wrap_stream(stream), file.size).file_name(file.name))
}
