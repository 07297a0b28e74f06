//! Single-entry extraction from the org directory archive.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::common::ClientError;

/// Removes a partially written file on drop unless disarmed.
pub(crate) struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed partial file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove partial file")
            }
        }
    }
}

/// Extract the entry named `preferred` (or, failing that, the last file
/// entry) from `archive` into `target`. Returns the bytes written. On error
/// nothing is left at `target`.
pub async fn extract_entry(
    archive: &Path,
    target: &Path,
    preferred: &str,
) -> Result<u64, ClientError> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    let preferred = preferred.to_string();

    let join_target = target.clone();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &target, &preferred))
        .await
        .map_err(|e| ClientError::Extraction {
            path: join_target,
            message: format!("extraction task failed: {e}"),
        })?
}

fn extract_blocking(archive: &Path, target: &Path, preferred: &str) -> Result<u64, ClientError> {
    let extraction_error = |message: String| ClientError::Extraction {
        path: archive.to_path_buf(),
        message,
    };

    let file = File::open(archive).map_err(|e| ClientError::filesystem(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extraction_error(e.to_string()))?;

    let index = select_entry(&mut zip, preferred)
        .map_err(|e| extraction_error(e.to_string()))?
        .ok_or_else(|| extraction_error("archive has no file entries".to_string()))?;

    let mut entry = zip
        .by_index(index)
        .map_err(|e| extraction_error(e.to_string()))?;
    tracing::debug!(entry = entry.name(), size = entry.size(), "extracting archive entry");

    let mut guard = PartialFile::new(target);
    let mut out = File::create(target).map_err(|e| ClientError::filesystem(target, e))?;
    let written = io::copy(&mut entry, &mut out)
        .map_err(|e| extraction_error(format!("reading {}: {e}", entry.name())))?;
    out.sync_all()
        .map_err(|e| ClientError::filesystem(target, e))?;
    guard.disarm();

    Ok(written)
}

fn select_entry(zip: &mut ZipArchive<File>, preferred: &str) -> zip::result::ZipResult<Option<usize>> {
    let mut last_file = None;

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let matches = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n == preferred))
            .unwrap_or(false);
        if matches {
            return Ok(Some(i));
        }
        last_file = Some(i);
    }

    Ok(last_file)
}
