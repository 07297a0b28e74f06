//! Per-file progress from one cumulative byte count across a multipart body.

use std::path::PathBuf;

use serde::Serialize;

use crate::common::ClientError;

/// One file of an upload, in body order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub total_files: usize,
    pub current_file_index: usize,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub bytes_transferred_for_current_file: u64,
    /// Always within `0.0..=1.0`.
    pub percent_for_current_file: f64,
}

/// Stateful mapping from a non-decreasing byte total to the file it falls in.
///
/// The index only moves forward and stops at the last file; once the last
/// file is complete every further update reports it at 1.0.
#[derive(Debug, Clone)]
pub struct UploadProgressTracker {
    files: Vec<FileEntry>,
    current_index: usize,
    accumulated: u64,
    finished: bool,
}

impl UploadProgressTracker {
    pub fn new(files: Vec<FileEntry>) -> Result<Self, ClientError> {
        if files.is_empty() {
            return Err(ClientError::UploadValidation(
                "upload needs at least one file".to_string(),
            ));
        }

        Ok(Self {
            files,
            current_index: 0,
            accumulated: 0,
            finished: false,
        })
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Bytes of every file before the current one.
    pub fn accumulated_bytes(&self) -> u64 {
        self.accumulated
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Report progress for a cumulative byte count. The event describes the
    /// file the bytes fell in before any advance this call triggers.
    pub fn on_progress(&mut self, transferred_total: u64) -> ProgressEvent {
        // Empty files produce no chunks, so bytes past one belong to a later file.
        while !self.finished
            && self.files[self.current_index].size_bytes == 0
            && transferred_total > self.accumulated
            && self.current_index + 1 < self.files.len()
        {
            self.current_index += 1;
        }

        let entry = &self.files[self.current_index];
        let size = entry.size_bytes;

        let bytes = transferred_total.saturating_sub(self.accumulated);
        let percent = if self.finished || size == 0 {
            1.0
        } else {
            (bytes as f64 / size as f64).min(1.0)
        };

        let event = ProgressEvent {
            total_files: self.files.len(),
            current_file_index: self.current_index,
            file_path: entry.path.clone(),
            file_size_bytes: size,
            bytes_transferred_for_current_file: if self.finished { size } else { bytes.min(size) },
            percent_for_current_file: percent,
        };

        if !self.finished && bytes >= size {
            if self.current_index + 1 < self.files.len() {
                self.accumulated += size;
                self.current_index += 1;
            } else {
                self.finished = true;
            }
        }

        event
    }
}
