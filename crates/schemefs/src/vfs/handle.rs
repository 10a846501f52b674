//! Open stream and directory handles.
//!
//! A handle is either open or closed. Every operation on a closed handle
//! fails with [`VfsError::HandleClosed`]; closing again is a no-op. Dropping
//! an open handle closes it.

use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use super::error::{VfsError, VfsResult};
use super::types::{FileStat, LockOperation, OpenMode, Whence};

/// Names every directory listing starts with.
const DOT_ENTRIES: [&str; 2] = [".", ".."];

/// An open file stream.
#[derive(Debug)]
pub struct StreamHandle {
    file: Option<File>,
    path: PathBuf,
    mode: OpenMode,
    eof: bool,
}

impl StreamHandle {
    pub(crate) fn new(file: File, path: PathBuf, mode: OpenMode) -> Self {
        Self {
            file: Some(file),
            path,
            mode,
            eof: false,
        }
    }

    /// Real path the stream was opened on.
    pub fn opened_path(&self) -> &Path {
        &self.path
    }

    /// Mode the stream was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file(&mut self) -> VfsResult<&mut File> {
        self.file.as_mut().ok_or(VfsError::HandleClosed)
    }

    fn io_err(&self, err: std::io::Error) -> VfsError {
        VfsError::from_io(err, &self.path)
    }

    /// Read up to `count` bytes.
    ///
    /// Returns fewer bytes only at end of file, which also sets the EOF flag.
    pub async fn read(&mut self, count: usize) -> VfsResult<Vec<u8>> {
        let file = self.file()?;
        let mut buf = Vec::with_capacity(count.min(64 * 1024));
        let result = file.take(count as u64).read_to_end(&mut buf).await;
        let n = result.map_err(|e| self.io_err(e))?;
        if n < count {
            self.eof = true;
        }
        Ok(buf)
    }

    /// Write all of `data`, returning the number of bytes written.
    ///
    /// Returns only after the native write has completed, so its failure
    /// is reported here rather than by a later call.
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let file = self.file()?;
        let result = match file.write_all(data).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.io_err(e))?;
        Ok(data.len())
    }

    /// Move the stream position. Returns the new offset.
    pub async fn seek(&mut self, offset: i64, whence: Whence) -> VfsResult<u64> {
        let target = whence.seek_from(offset)?;
        let file = self.file()?;
        let result = file.seek(target).await;
        let pos = result.map_err(|e| self.io_err(e))?;
        self.eof = false;
        Ok(pos)
    }

    /// Current stream position.
    pub async fn tell(&mut self) -> VfsResult<u64> {
        let file = self.file()?;
        let result = file.stream_position().await;
        result.map_err(|e| self.io_err(e))
    }

    /// Truncate or extend the file to `size` bytes.
    pub async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        let file = self.file()?;
        let result = file.set_len(size).await;
        result.map_err(|e| self.io_err(e))
    }

    /// Flush buffered writes to the OS.
    pub async fn flush(&mut self) -> VfsResult<()> {
        let file = self.file()?;
        let result = file.flush().await;
        result.map_err(|e| self.io_err(e))
    }

    /// Apply an advisory `flock(2)` lock.
    ///
    /// Blocking requests wait on the blocking pool against a duplicate of
    /// the descriptor, which shares the lock with this handle.
    pub async fn lock(&mut self, op: LockOperation) -> VfsResult<()> {
        let file = self.file()?;
        let fd = file.as_fd().try_clone_to_owned();
        let fd = fd.map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), ?op, "flock");
        let result = tokio::task::spawn_blocking(move || {
            rustix::fs::flock(&fd, op.flock_operation()).map_err(std::io::Error::from)
        })
        .await
        .map_err(|e| VfsError::other(format!("lock task failed: {e}")))?;
        result.map_err(|e| self.io_err(e))
    }

    /// Returns true once a read has hit end of file.
    pub fn eof(&self) -> VfsResult<bool> {
        if self.file.is_none() {
            return Err(VfsError::HandleClosed);
        }
        Ok(self.eof)
    }

    /// `fstat` of the open file, after pending writes have landed.
    pub async fn stat(&mut self) -> VfsResult<FileStat> {
        let file = self.file()?;
        let result = match file.flush().await {
            Ok(()) => file.metadata().await,
            Err(e) => Err(e),
        };
        let meta = result.map_err(|e| self.io_err(e))?;
        Ok(FileStat::from_metadata(&meta))
    }

    /// Tune a stream option. Local file streams have none.
    pub fn set_option(&mut self, _option: i32, _arg1: i64, _arg2: i64) -> VfsResult<()> {
        Err(VfsError::Unsupported("stream options"))
    }

    /// Underlying descriptor, for hosts that select/poll on it.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    /// Flush and close. Closing a closed handle does nothing.
    pub async fn close(&mut self) -> VfsResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        debug!(path = %self.path.display(), "closing stream");
        file.flush().await.map_err(|e| self.io_err(e))
    }
}

/// An open directory listing.
///
/// Entries are read from the OS when the handle is opened and again on
/// [`DirHandle::rewind`]. `.` and `..` come first.
#[derive(Debug)]
pub struct DirHandle {
    path: PathBuf,
    entries: Option<Vec<String>>,
    cursor: usize,
}

impl DirHandle {
    pub(crate) async fn open(path: PathBuf) -> VfsResult<Self> {
        let entries = list_dir(&path).await?;
        Ok(Self {
            path,
            entries: Some(entries),
            cursor: 0,
        })
    }

    /// Real path of the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.entries.is_some()
    }

    /// Next entry name, or `None` once the listing is exhausted.
    pub fn read_entry(&mut self) -> VfsResult<Option<String>> {
        let entries = self.entries.as_ref().ok_or(VfsError::HandleClosed)?;
        let entry = entries.get(self.cursor).cloned();
        if entry.is_some() {
            self.cursor += 1;
        }
        Ok(entry)
    }

    /// Restart the listing from the first entry.
    pub async fn rewind(&mut self) -> VfsResult<()> {
        if self.entries.is_none() {
            return Err(VfsError::HandleClosed);
        }
        let fresh = list_dir(&self.path).await?;
        self.entries = Some(fresh);
        self.cursor = 0;
        Ok(())
    }

    /// Close the listing. Closing a closed handle does nothing.
    pub fn close(&mut self) {
        if self.entries.take().is_some() {
            debug!(path = %self.path.display(), "closing directory");
        }
    }
}

async fn list_dir(path: &Path) -> VfsResult<Vec<String>> {
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| VfsError::from_io(e, path))?;

    let mut names: Vec<String> = DOT_ENTRIES.iter().map(|s| s.to_string()).collect();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| VfsError::from_io(e, path))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
