pub mod archive;
pub mod engine;
pub mod fs;

pub use engine::{DirectorySync, SyncPaths, SyncPhase, SyncReport};
pub use fs::{SyncFs, TokioFs};
