//! Client transport for the messenger protocol: operation discovery, the
//! request pipeline, attachment transfer and org directory sync.

pub mod common;
pub mod protocol;
pub mod sync;
pub mod transfer;
pub mod transport;
pub mod utils;

pub use common::{ClientConfig, ClientError, SessionState, SessionStore};
pub use protocol::{Operation, ProtocolRegistry};
pub use sync::{DirectorySync, SyncPaths, SyncPhase};
pub use transfer::{DownloadRequest, DownloadTarget, UploadFile, UploadRequest};
pub use transport::{Client, Credentials, LoginSummary};
