pub mod download;
pub mod progress;
pub mod upload;

pub use download::{DownloadProgress, DownloadRequest, DownloadTarget, Downloaded};
pub use progress::{FileEntry, ProgressEvent, UploadProgressTracker};
pub use upload::{UploadFile, UploadRequest};
