//! Fail-soft operation surface for host runtimes.
//!
//! [`StreamWrapper`] exposes the operation set a host's pluggable
//! filesystem-scheme mechanism calls into. Selectors arrive as the host's
//! raw integers. No failure escapes as an error: each operation logs a
//! warning, records a [`Diagnostic`], and returns its failure value
//! (`false`, `0`, empty, or `None`).
//!
//! ```no_run
//! use std::sync::Arc;
//! use schemefs::{SchemeRegistry, StreamOptions, StreamWrapper};
//!
//! # async fn demo() {
//! let registry = Arc::new(SchemeRegistry::new());
//! registry.register("app", "/srv/app").unwrap();
//! let wrapper = StreamWrapper::local(registry);
//!
//! if let Some(mut h) = wrapper.open("app://x.txt", "w", StreamOptions::default()).await {
//!     wrapper.write(&mut h, b"hi").await;
//!     wrapper.close(&mut h).await;
//! }
//! # }
//! ```

use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::SchemeRegistry;
use crate::vfs::{
    DirHandle, FileStat, LocalFs, LockOperation, MetaValue, MetadataChange, OpenMode, SchemeOps,
    StatFlags, StreamHandle, StreamOptions, VfsError, VfsResult, Whence,
};

/// Host option bit requesting recursive mkdir/rmdir.
pub const RECURSIVE: i32 = 1;

/// Details of the most recent failure, kept for callers that want more than
/// a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Operation name (e.g., "open", "rmdir").
    pub op: &'static str,
    /// Path or handle description the operation targeted.
    pub target: String,
    /// Rendered error.
    pub message: String,
    /// Raw OS error code, when there was one.
    pub os_code: Option<i32>,
}

/// Fail-soft facade over a [`SchemeOps`] implementation.
pub struct StreamWrapper<O: SchemeOps = LocalFs> {
    ops: O,
    last_error: Mutex<Option<Diagnostic>>,
}

impl<O: SchemeOps + std::fmt::Debug> std::fmt::Debug for StreamWrapper<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWrapper")
            .field("ops", &self.ops)
            .finish_non_exhaustive()
    }
}

impl StreamWrapper<LocalFs> {
    /// Wrapper over the local filesystem using `registry` for resolution.
    pub fn local(registry: Arc<SchemeRegistry>) -> Self {
        Self::new(LocalFs::new(registry))
    }
}

impl<O: SchemeOps> StreamWrapper<O> {
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            last_error: Mutex::new(None),
        }
    }

    /// The typed operations underneath.
    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Take the diagnostic of the most recent failure, if any.
    pub fn take_last_error(&self) -> Option<Diagnostic> {
        self.last_error.lock().take()
    }

    fn report(&self, op: &'static str, target: &str, err: &VfsError, loud: bool) {
        if loud {
            warn!(op, target, error = %err, "filesystem operation failed");
        } else {
            debug!(op, target, error = %err, "filesystem operation failed");
        }
        *self.last_error.lock() = Some(Diagnostic {
            op,
            target: target.to_string(),
            message: err.to_string(),
            os_code: err.raw_os_error(),
        });
    }

    /// Unwrap `result`, or report and fall back.
    fn soften<T>(&self, op: &'static str, target: &str, result: VfsResult<T>, fallback: T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.report(op, target, &e, true);
                fallback
            }
        }
    }

    fn handle_target(handle: &StreamHandle) -> String {
        handle.opened_path().display().to_string()
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Open `path` with an fopen-style `mode`. `None` on failure.
    pub async fn open(
        &self,
        path: &str,
        mode: &str,
        options: StreamOptions,
    ) -> Option<StreamHandle> {
        let result = match OpenMode::parse(mode) {
            Ok(mode) => self.ops.open(path, mode).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.report("open", path, &e, options.report_errors);
                None
            }
        }
    }

    /// Up to `count` bytes; empty on error or closed handle.
    pub async fn read(&self, handle: &mut StreamHandle, count: usize) -> Vec<u8> {
        let result = handle.read(count).await;
        self.soften("read", &Self::handle_target(handle), result, Vec::new())
    }

    /// Bytes written; `0` on error or closed handle.
    pub async fn write(&self, handle: &mut StreamHandle, data: &[u8]) -> usize {
        let result = handle.write(data).await;
        self.soften("write", &Self::handle_target(handle), result, 0)
    }

    pub async fn seek(&self, handle: &mut StreamHandle, offset: i64, whence: i32) -> bool {
        let result = match Whence::from_raw(whence) {
            Ok(whence) => handle.seek(offset, whence).await.map(|_| true),
            Err(e) => Err(e),
        };
        self.soften("seek", &Self::handle_target(handle), result, false)
    }

    pub async fn tell(&self, handle: &mut StreamHandle) -> u64 {
        let result = handle.tell().await;
        self.soften("tell", &Self::handle_target(handle), result, 0)
    }

    pub async fn truncate(&self, handle: &mut StreamHandle, size: u64) -> bool {
        let result = handle.truncate(size).await.map(|_| true);
        self.soften("truncate", &Self::handle_target(handle), result, false)
    }

    pub async fn flush(&self, handle: &mut StreamHandle) -> bool {
        let result = handle.flush().await.map(|_| true);
        self.soften("flush", &Self::handle_target(handle), result, false)
    }

    /// Advisory lock with the host's `LOCK_*` bits.
    pub async fn lock(&self, handle: &mut StreamHandle, operation: i32) -> bool {
        let result = match LockOperation::from_raw(operation) {
            Ok(op) => handle.lock(op).await.map(|_| true),
            Err(e) => Err(e),
        };
        self.soften("lock", &Self::handle_target(handle), result, false)
    }

    pub async fn close(&self, handle: &mut StreamHandle) {
        let result = handle.close().await;
        self.soften("close", &Self::handle_target(handle), result, ());
    }

    pub fn eof(&self, handle: &StreamHandle) -> bool {
        let result = handle.eof();
        self.soften("eof", &Self::handle_target(handle), result, false)
    }

    /// `fstat`; `None` (the empty record) on error or closed handle.
    pub async fn fstat(&self, handle: &mut StreamHandle) -> Option<FileStat> {
        let result = handle.stat().await.map(Some);
        self.soften("fstat", &Self::handle_target(handle), result, None)
    }

    /// Local streams have no tunable options; always `false`, silently.
    pub fn set_option(&self, handle: &mut StreamHandle, option: i32, arg1: i64, arg2: i64) -> bool {
        handle.set_option(option, arg1, arg2).is_ok()
    }

    /// Underlying descriptor of an open stream.
    pub fn cast(&self, handle: &StreamHandle) -> Option<RawFd> {
        handle.raw_fd()
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Stat with the host's `STREAM_URL_STAT_*` bits.
    ///
    /// `None` when nothing exists at the resolved path or on failure.
    pub async fn url_stat(&self, path: &str, flags: i32) -> Option<FileStat> {
        let flags = StatFlags::from_raw(flags);
        match self.ops.stat(path, flags).await {
            Ok(stat) => stat,
            Err(e) => {
                self.report("url_stat", path, &e, !flags.quiet);
                None
            }
        }
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.ops.exists(path).await
    }

    pub async fn mkdir(&self, path: &str, mode: u32, options: i32) -> bool {
        let result = self.ops.mkdir(path, mode, options & RECURSIVE != 0).await;
        self.soften("mkdir", path, result.map(|_| true), false)
    }

    pub async fn rmdir(&self, path: &str, options: i32) -> bool {
        let result = self.ops.rmdir(path, options & RECURSIVE != 0).await;
        self.soften("rmdir", path, result.map(|_| true), false)
    }

    pub async fn rename(&self, from: &str, to: &str) -> bool {
        let result = self.ops.rename(from, to).await;
        self.soften("rename", from, result.map(|_| true), false)
    }

    pub async fn unlink(&self, path: &str) -> bool {
        let result = self.ops.unlink(path).await;
        self.soften("unlink", path, result.map(|_| true), false)
    }

    /// Apply a host metadata selector (`STREAM_META_*`) with its value.
    ///
    /// Unknown selectors return `false` without a diagnostic.
    pub async fn set_metadata(&self, path: &str, option: i32, value: MetaValue) -> bool {
        let change = match MetadataChange::from_raw(option, value) {
            Ok(change) => change,
            Err(e @ VfsError::UnknownSelector { kind: "metadata", .. }) => {
                debug!(path, option, error = %e, "metadata selector not handled");
                return false;
            }
            Err(e) => {
                self.report("metadata", path, &e, true);
                return false;
            }
        };
        let op = change.name();
        let result = self.ops.set_metadata(path, change).await;
        self.soften(op, path, result.map(|_| true), false)
    }

    // ========================================================================
    // Directories
    // ========================================================================

    pub async fn opendir(&self, path: &str, options: StreamOptions) -> Option<DirHandle> {
        match self.ops.opendir(path).await {
            Ok(dir) => Some(dir),
            Err(e) => {
                self.report("opendir", path, &e, options.report_errors);
                None
            }
        }
    }

    /// Next entry name; empty string at the end of the listing or on error.
    pub fn readdir(&self, dir: &mut DirHandle) -> String {
        let result = dir.read_entry().map(Option::unwrap_or_default);
        self.soften("readdir", &dir.path().display().to_string(), result, String::new())
    }

    pub async fn rewinddir(&self, dir: &mut DirHandle) -> bool {
        let result = dir.rewind().await.map(|_| true);
        self.soften("rewinddir", &dir.path().display().to_string(), result, false)
    }

    pub fn closedir(&self, dir: &mut DirHandle) {
        dir.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (StreamWrapper, TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SchemeRegistry::new());
        registry.register("test", dir.path()).unwrap();
        let root = registry.root("test").unwrap();
        (StreamWrapper::local(registry), dir, root)
    }

    fn denied(path: &str) -> VfsError {
        VfsError::from_io(std::io::Error::from_raw_os_error(13), std::path::Path::new(path))
    }

    /// Ops whose every path call fails with a fixed OS error.
    struct Failing;

    #[async_trait]
    impl SchemeOps for Failing {
        fn resolve(&self, path: &str) -> PathBuf {
            PathBuf::from(path)
        }
        async fn open(&self, _: &str, _: OpenMode) -> VfsResult<StreamHandle> {
            Err(std::io::Error::from_raw_os_error(28).into())
        }
        async fn opendir(&self, _: &str) -> VfsResult<DirHandle> {
            Err(denied("d"))
        }
        async fn stat(&self, _: &str, _: StatFlags) -> VfsResult<Option<FileStat>> {
            Err(denied("s"))
        }
        async fn set_metadata(&self, _: &str, _: MetadataChange) -> VfsResult<()> {
            Err(denied("m"))
        }
        async fn mkdir(&self, _: &str, _: u32, _: bool) -> VfsResult<()> {
            Err(denied("mk"))
        }
        async fn rmdir(&self, _: &str, _: bool) -> VfsResult<()> {
            Err(denied("rm"))
        }
        async fn rename(&self, _: &str, _: &str) -> VfsResult<()> {
            Err(denied("mv"))
        }
        async fn unlink(&self, _: &str) -> VfsResult<()> {
            Err(denied("ul"))
        }
    }

    #[tokio::test]
    async fn test_failures_become_sentinels() {
        let wrapper = StreamWrapper::new(Failing);

        assert!(wrapper.open("x://a", "r", StreamOptions::default()).await.is_none());
        let diag = wrapper.take_last_error().unwrap();
        assert_eq!(diag.op, "open");
        assert_eq!(diag.os_code, Some(28));

        assert!(wrapper.opendir("x://d", StreamOptions::default()).await.is_none());
        assert!(wrapper.url_stat("x://s", 0).await.is_none());
        assert!(!wrapper.exists("x://s").await);
        assert!(!wrapper.mkdir("x://mk", 0o777, 0).await);
        assert!(!wrapper.rmdir("x://rm", RECURSIVE).await);
        assert!(!wrapper.rename("x://a", "x://b").await);
        assert!(!wrapper.unlink("x://ul").await);
        assert!(
            !wrapper
                .set_metadata("x://m", MetadataChange::ACCESS, MetaValue::Int(0o644))
                .await
        );

        let diag = wrapper.take_last_error().unwrap();
        assert_eq!(diag.op, "chmod");
        assert!(wrapper.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_invalid_mode_is_soft() {
        let (wrapper, _dir, _root) = setup();
        assert!(wrapper.open("test://f", "z", StreamOptions::default()).await.is_none());
        assert!(wrapper.take_last_error().unwrap().message.contains("open mode"));
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let (wrapper, _dir, root) = setup();

        let mut h = wrapper
            .open("test://file.ext", "w+", StreamOptions::default())
            .await
            .unwrap();
        assert_eq!(wrapper.write(&mut h, b"contents\n").await, 9);
        assert!(wrapper.flush(&mut h).await);
        assert_eq!(wrapper.tell(&mut h).await, 9);
        assert!(wrapper.seek(&mut h, 0, Whence::SET).await);
        assert_eq!(wrapper.read(&mut h, 100).await, b"contents\n");
        assert!(wrapper.eof(&h));

        let stat = wrapper.fstat(&mut h).await.unwrap();
        assert_eq!(stat.size, 9);
        assert!(wrapper.cast(&h).is_some());

        wrapper.close(&mut h).await;
        assert_eq!(std::fs::read(root.join("file.ext")).unwrap(), b"contents\n");
    }

    #[tokio::test]
    async fn test_closed_handle_sentinels() {
        let (wrapper, _dir, _root) = setup();
        let mut h = wrapper
            .open("test://f", "w+", StreamOptions::default())
            .await
            .unwrap();
        wrapper.close(&mut h).await;

        assert_eq!(wrapper.read(&mut h, 10).await, b"");
        assert_eq!(wrapper.write(&mut h, b"x").await, 0);
        assert!(!wrapper.seek(&mut h, 0, Whence::SET).await);
        assert_eq!(wrapper.tell(&mut h).await, 0);
        assert!(!wrapper.truncate(&mut h, 0).await);
        assert!(!wrapper.flush(&mut h).await);
        assert!(!wrapper.lock(&mut h, LockOperation::SHARED).await);
        assert!(!wrapper.eof(&h));
        assert!(wrapper.fstat(&mut h).await.is_none());
        assert!(wrapper.cast(&h).is_none());
        wrapper.close(&mut h).await;

        assert!(matches!(
            wrapper.take_last_error(),
            Some(Diagnostic { op: "fstat", .. })
        ));
    }

    #[tokio::test]
    async fn test_write_failure_on_open_stream() {
        let (wrapper, _dir, root) = setup();
        std::fs::write(root.join("f"), b"keep").unwrap();

        let mut h = wrapper
            .open("test://f", "r", StreamOptions::default())
            .await
            .unwrap();
        assert_eq!(wrapper.write(&mut h, b"abc").await, 0);

        let diag = wrapper.take_last_error().unwrap();
        assert_eq!(diag.op, "write");
        assert_eq!(diag.os_code, Some(9));

        assert_eq!(wrapper.tell(&mut h).await, 0);
        assert!(wrapper.flush(&mut h).await);
        assert!(wrapper.take_last_error().is_none());
        wrapper.close(&mut h).await;
        assert!(wrapper.take_last_error().is_none());
        assert_eq!(std::fs::read(root.join("f")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_bad_selectors() {
        let (wrapper, _dir, _root) = setup();
        let mut h = wrapper
            .open("test://f", "w", StreamOptions::default())
            .await
            .unwrap();
        assert!(!wrapper.seek(&mut h, 0, 9).await);
        assert!(!wrapper.lock(&mut h, 0).await);
        assert!(wrapper.lock(&mut h, LockOperation::EXCLUSIVE).await);
        assert!(wrapper.lock(&mut h, LockOperation::UNLOCK).await);
    }

    #[tokio::test]
    async fn test_set_option_always_false_without_diagnostic() {
        let (wrapper, _dir, _root) = setup();
        let mut h = wrapper
            .open("test://f", "w", StreamOptions::default())
            .await
            .unwrap();
        assert!(!wrapper.set_option(&mut h, 1, 0, 0));
        assert!(!wrapper.set_option(&mut h, 4, 1, 1));
        assert!(wrapper.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_unknown_metadata_selector() {
        let (wrapper, _dir, root) = setup();
        std::fs::write(root.join("f"), b"").unwrap();

        for value in [
            MetaValue::None,
            MetaValue::Int(0o644),
            MetaValue::Text("root".into()),
            MetaValue::Times(Some(1), Some(2)),
        ] {
            assert!(!wrapper.set_metadata("test://f", 42, value).await);
        }
        assert!(wrapper.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_touch_via_selector() {
        let (wrapper, _dir, root) = setup();
        assert!(wrapper.mkdir("test://directory", 0o777, 0).await);
        assert!(
            wrapper
                .set_metadata(
                    "test://directory/with-a-file.ext",
                    MetadataChange::TOUCH,
                    MetaValue::None
                )
                .await
        );
        assert!(root.join("directory/with-a-file.ext").exists());
    }

    #[tokio::test]
    async fn test_url_stat_quiet_and_missing() {
        let (wrapper, _dir, _root) = setup();
        assert!(wrapper.url_stat("test://missing", 0).await.is_none());
        assert!(wrapper.take_last_error().is_none());

        let stat = wrapper.url_stat("test://", StatFlags::QUIET).await.unwrap();
        assert!(stat.is_dir());
    }

    #[tokio::test]
    async fn test_directory_ops() {
        let (wrapper, _dir, _root) = setup();
        assert!(
            wrapper
                .set_metadata("test://file.txt", MetadataChange::TOUCH, MetaValue::None)
                .await
        );
        assert!(wrapper.mkdir("test://directory", 0o777, 0).await);

        let mut d = wrapper
            .opendir("test://", StreamOptions::default())
            .await
            .unwrap();
        let mut entries = Vec::new();
        loop {
            let entry = wrapper.readdir(&mut d);
            if entry.is_empty() {
                break;
            }
            entries.push(entry);
        }
        for expected in [".", "..", "file.txt", "directory"] {
            assert!(entries.iter().any(|e| e == expected), "missing {expected}");
        }

        assert!(wrapper.rewinddir(&mut d).await);
        assert_eq!(wrapper.readdir(&mut d), entries[0]);

        wrapper.closedir(&mut d);
        assert_eq!(wrapper.readdir(&mut d), "");
        assert!(!wrapper.rewinddir(&mut d).await);
    }

    #[tokio::test]
    async fn test_mkdir_and_rmdir_options() {
        let (wrapper, _dir, root) = setup();
        assert!(!wrapper.mkdir("test://directory/in-a-directory", 0o777, 0).await);
        assert!(
            wrapper
                .mkdir("test://directory/in-a-directory", 0o777, RECURSIVE)
                .await
        );
        assert!(wrapper.rmdir("test://directory/in-a-directory", 0).await);
        assert!(root.join("directory").is_dir());
        assert!(!wrapper.rmdir("test://directory/in-a-directory", 0).await);
    }

    #[tokio::test]
    async fn test_report_errors_off_still_records() {
        let (wrapper, _dir, _root) = setup();
        let quiet = StreamOptions {
            report_errors: false,
        };
        assert!(wrapper.open("test://missing", "r", quiet).await.is_none());
        let diag = wrapper.take_last_error().unwrap();
        assert_eq!(diag.op, "open");
    }
}
