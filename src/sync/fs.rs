//! Filesystem seam for the swap steps.

use std::io;
use std::path::Path;

use async_trait::async_trait;

/// Operations the swap performs. Tests substitute an implementation that
/// fails on chosen calls.
#[async_trait]
pub trait SyncFs: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait]
impl SyncFs for TokioFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}
