//! Path-qualified operations trait.
//!
//! Paths handed to these operations may be virtual (`scheme://...`) or
//! real; implementations resolve them before touching the filesystem.
//! Operations on an already-open stream or directory live on
//! [`StreamHandle`] and [`DirHandle`].

use async_trait::async_trait;
use std::path::PathBuf;

use super::VfsResult;
use super::handle::{DirHandle, StreamHandle};
use super::types::{FileStat, MetadataChange, OpenMode, StatFlags};

/// Typed filesystem operations on virtual-or-real paths.
#[async_trait]
pub trait SchemeOps: Send + Sync {
    /// Rewrite a virtual path into a real path (identity otherwise).
    fn resolve(&self, path: &str) -> PathBuf;

    // ========================================================================
    // Streams and directories
    // ========================================================================

    /// Open a file stream.
    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<StreamHandle>;

    /// Open a directory listing.
    async fn opendir(&self, path: &str) -> VfsResult<DirHandle>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Stat a path.
    ///
    /// Returns `Ok(None)` when nothing exists at the resolved path.
    async fn stat(&self, path: &str, flags: StatFlags) -> VfsResult<Option<FileStat>>;

    /// Apply one metadata change (touch, chown, chgrp, chmod).
    async fn set_metadata(&self, path: &str, change: MetadataChange) -> VfsResult<()>;

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create a directory.
    ///
    /// Succeeds if a directory exists at the path afterwards, even when the
    /// native call failed.
    async fn mkdir(&self, path: &str, mode: u32, recursive: bool) -> VfsResult<()>;

    /// Remove a directory.
    ///
    /// With `recursive`, also removes parent directories upward while they
    /// exist, stopping at the scheme root.
    async fn rmdir(&self, path: &str, recursive: bool) -> VfsResult<()>;

    /// Rename a file or directory. The source must exist.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        matches!(self.stat(path, StatFlags::default()).await, Ok(Some(_)))
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut handle = self.open(path, OpenMode::parse("r")?).await?;
        let mut data = Vec::new();
        loop {
            let chunk = handle.read(64 * 1024).await?;
            data.extend_from_slice(&chunk);
            if handle.eof()? {
                break;
            }
        }
        handle.close().await?;
        Ok(data)
    }

    /// Write entire file contents, creating or truncating the file.
    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<usize> {
        let mut handle = self.open(path, OpenMode::parse("w")?).await?;
        let written = handle.write(data).await?;
        handle.close().await?;
        Ok(written)
    }
}
