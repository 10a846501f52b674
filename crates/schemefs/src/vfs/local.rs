//! Local filesystem dispatcher.
//!
//! Every path operation resolves its argument through the
//! [`SchemeRegistry`] and then makes exactly one native call (plus the
//! existence checks a few operations require). No path security is applied:
//! the remainder after `scheme://` is concatenated onto the root as-is.

use async_trait::async_trait;
use std::fs::{self, DirBuilder, FileTimes, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use crate::registry::SchemeRegistry;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::handle::{DirHandle, StreamHandle};
use crate::vfs::ops::SchemeOps;
use crate::vfs::types::{FileStat, MetadataChange, OpenMode, StatFlags};

/// Local filesystem operations addressed through scheme bindings.
///
/// For example, with `app` bound to `/home/amy/project`,
/// `unlink("app://src/old.rs")` removes `/home/amy/project/src/old.rs`.
/// Real paths are accepted too and used unchanged.
#[derive(Debug, Clone)]
pub struct LocalFs {
    registry: Arc<SchemeRegistry>,
}

impl LocalFs {
    /// Create a dispatcher over the given registry.
    pub fn new(registry: Arc<SchemeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry used for resolution.
    pub fn registry(&self) -> &Arc<SchemeRegistry> {
        &self.registry
    }

    /// Resolve `path` and run one native call against the real path.
    ///
    /// The call runs on the blocking pool; its `io::Error` is classified
    /// against the real path.
    async fn native<T, F>(&self, op: &'static str, path: &str, call: F) -> VfsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        let real = self.registry.resolve(path);
        Self::native_at(op, real, call).await
    }

    /// [`LocalFs::native`] for a path that is already real.
    async fn native_at<T, F>(op: &'static str, real: PathBuf, call: F) -> VfsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        debug!(op, path = %real.display(), "native call");
        Self::blocking(op, move || call(&real).map_err(|e| VfsError::from_io(e, &real))).await
    }

    /// Run `call` on the blocking pool.
    async fn blocking<T, F>(op: &'static str, call: F) -> VfsResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> VfsResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(call)
            .await
            .map_err(|e| VfsError::other(format!("{op} task failed: {e}")))?
    }
}

#[async_trait]
impl SchemeOps for LocalFs {
    fn resolve(&self, path: &str) -> PathBuf {
        self.registry.resolve(path)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> VfsResult<StreamHandle> {
        let real = self.registry.resolve(path);
        let file = Self::native_at("open", real.clone(), move |p| {
            mode.to_open_options().open(p)
        })
        .await?;
        Ok(StreamHandle::new(tokio::fs::File::from_std(file), real, mode))
    }

    async fn opendir(&self, path: &str) -> VfsResult<DirHandle> {
        let real = self.registry.resolve(path);
        debug!(path = %real.display(), "opendir");
        DirHandle::open(real).await
    }

    async fn stat(&self, path: &str, flags: StatFlags) -> VfsResult<Option<FileStat>> {
        let result = self
            .native("stat", path, move |p| {
                if flags.link {
                    fs::symlink_metadata(p)
                } else {
                    fs::metadata(p)
                }
            })
            .await;

        match result {
            Ok(meta) => Ok(Some(FileStat::from_metadata(&meta))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_metadata(&self, path: &str, change: MetadataChange) -> VfsResult<()> {
        match change {
            MetadataChange::Touch { mtime, atime } => {
                self.native("touch", path, move |p| touch(p, mtime, atime))
                    .await
            }
            MetadataChange::Access(mode) => {
                self.native("chmod", path, move |p| {
                    fs::set_permissions(p, Permissions::from_mode(mode))
                })
                .await
            }
            MetadataChange::Owner(uid) => self.chown(path, Some(uid), None).await,
            MetadataChange::Group(gid) => self.chown(path, None, Some(gid)).await,
            MetadataChange::OwnerName(name) => {
                let uid = Self::blocking("getpwnam", move || lookup_user(&name)).await?;
                self.chown(path, Some(uid), None).await
            }
            MetadataChange::GroupName(name) => {
                let gid = Self::blocking("getgrnam", move || lookup_group(&name)).await?;
                self.chown(path, None, Some(gid)).await
            }
        }
    }

    async fn mkdir(&self, path: &str, mode: u32, recursive: bool) -> VfsResult<()> {
        self.native("mkdir", path, move |p| {
            match DirBuilder::new().mode(mode).recursive(recursive).create(p) {
                Ok(()) => Ok(()),
                Err(_) if p.is_dir() => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> VfsResult<()> {
        let (real, root) = match self.registry.lookup(path) {
            Some(resolved) => (resolved.real, Some(resolved.root)),
            None => (PathBuf::from(path), None),
        };

        if !recursive {
            return Self::native_at("rmdir", real, |p| {
                fs::symlink_metadata(p)?;
                fs::remove_dir(p)
            })
            .await;
        }

        if root.as_deref() == Some(real.as_path()) {
            return Err(VfsError::ProtectedRoot(real.display().to_string()));
        }
        Self::native_at("rmdir", real, move |p| remove_upward(p, root.as_deref())).await
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let to = self.registry.resolve(to);
        self.native("rename", from, move |p| {
            fs::symlink_metadata(p)?;
            fs::rename(p, &to)
        })
        .await
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        self.native("unlink", path, |p| fs::remove_file(p)).await
    }
}

impl LocalFs {
    async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> VfsResult<()> {
        self.native("chown", path, move |p| {
            nix::unistd::chown(
                p,
                uid.map(nix::unistd::Uid::from_raw),
                gid.map(nix::unistd::Gid::from_raw),
            )
            .map_err(io::Error::from)
        })
        .await
    }
}

/// Create the file if missing, then set its times (defaulting to now).
fn touch(path: &Path, mtime: Option<SystemTime>, atime: Option<SystemTime>) -> io::Result<()> {
    let file = if path.is_dir() {
        fs::File::open(path)?
    } else {
        fs::OpenOptions::new().append(true).create(true).open(path)?
    };

    let now = SystemTime::now();
    let times = FileTimes::new()
        .set_modified(mtime.unwrap_or(now))
        .set_accessed(atime.unwrap_or(now));
    file.set_times(times)
}

/// Remove `path`, then each parent while it exists.
///
/// With a scheme root, the walk stops below the root; without one, only
/// `path` itself is removed. Fails on the first removal that fails. The
/// caller rejects `path == root` before getting here.
fn remove_upward(path: &Path, root: Option<&Path>) -> io::Result<()> {
    let mut current = path.to_path_buf();
    loop {
        if fs::symlink_metadata(&current).is_err() {
            return Ok(());
        }
        if root.is_some_and(|root| !current.starts_with(root)) {
            return Ok(());
        }

        fs::remove_dir(&current)?;
        debug!(path = %current.display(), "removed directory");

        let Some(root) = root else {
            return Ok(());
        };
        match current.parent() {
            Some(parent) if parent != root => current = parent.to_path_buf(),
            _ => return Ok(()),
        }
    }
}

fn lookup_user(name: &str) -> VfsResult<u32> {
    nix::unistd::User::from_name(name)?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| VfsError::UnknownUser(name.to_string()))
}

fn lookup_group(name: &str) -> VfsResult<u32> {
    nix::unistd::Group::from_name(name)?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| VfsError::UnknownGroup(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn setup() -> (LocalFs, TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SchemeRegistry::new());
        registry.register("test", dir.path()).unwrap();
        let root = registry.root("test").unwrap();
        (LocalFs::new(registry), dir, root)
    }

    #[tokio::test]
    async fn test_write_all_and_read_all() {
        let (fs, _dir, root) = setup();

        assert_eq!(fs.write_all("test://file.ext", b"contents\n").await.unwrap(), 9);
        assert!(root.join("file.ext").exists());
        assert_eq!(fs.read_all("test://file.ext").await.unwrap(), b"contents\n");
    }

    #[tokio::test]
    async fn test_open_records_real_path() {
        let (fs, _dir, root) = setup();
        let handle = fs
            .open("test://new.txt", OpenMode::parse("x").unwrap())
            .await
            .unwrap();
        assert_eq!(handle.opened_path(), root.join("new.txt"));

        let again = fs.open("test://new.txt", OpenMode::parse("x").unwrap()).await;
        assert!(matches!(again, Err(VfsError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_open_missing_for_read() {
        let (fs, _dir, _root) = setup();
        let result = fs.open("test://missing", OpenMode::parse("r").unwrap()).await;
        assert!(matches!(result, Err(VfsError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_real_paths_pass_through() {
        let (fs, dir, _root) = setup();
        let real = dir.path().join("plain.txt");
        let real = real.to_str().unwrap();

        fs.write_all(real, b"plain").await.unwrap();
        assert_eq!(fs.read_all(real).await.unwrap(), b"plain");
    }

    #[tokio::test]
    async fn test_stat_not_found_is_none() {
        let (fs, _dir, _root) = setup();
        assert_eq!(
            fs.stat("test://nothing", StatFlags::default()).await.unwrap(),
            None
        );
        assert!(!fs.exists("test://nothing").await);
    }

    #[tokio::test]
    async fn test_stat_link_flag() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("target"), b"12345").unwrap();
        std::os::unix::fs::symlink(root.join("target"), root.join("link")).unwrap();

        let followed = fs.stat("test://link", StatFlags::default()).await.unwrap().unwrap();
        assert!(followed.is_file());
        assert_eq!(followed.size, 5);

        let flags = StatFlags { link: true, quiet: false };
        let own = fs.stat("test://link", flags).await.unwrap().unwrap();
        assert!(own.is_symlink());
    }

    #[tokio::test]
    async fn test_dangling_link() {
        let (fs, _dir, root) = setup();
        std::os::unix::fs::symlink(root.join("gone"), root.join("dangling")).unwrap();

        assert_eq!(fs.stat("test://dangling", StatFlags::default()).await.unwrap(), None);
        let flags = StatFlags { link: true, quiet: true };
        assert!(fs.stat("test://dangling", flags).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mkdir_existing_is_success() {
        let (fs, _dir, root) = setup();
        fs.mkdir("test://directory", 0o777, false).await.unwrap();
        fs.mkdir("test://directory", 0o777, false).await.unwrap();
        assert!(root.join("directory").is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_missing_parent() {
        let (fs, _dir, _root) = setup();
        assert!(fs.mkdir("test://a/b", 0o777, false).await.is_err());
        fs.mkdir("test://a/b", 0o777, true).await.unwrap();
        assert!(fs.exists("test://a/b").await);
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("file"), b"").unwrap();
        assert!(fs.mkdir("test://file", 0o777, false).await.is_err());
    }

    #[tokio::test]
    async fn test_rmdir_plain() {
        let (fs, _dir, root) = setup();
        fs.mkdir("test://directory/in-a-directory", 0o777, true).await.unwrap();
        fs.rmdir("test://directory/in-a-directory", false).await.unwrap();
        assert!(!root.join("directory/in-a-directory").exists());
        assert!(root.join("directory").is_dir());

        assert!(fs.rmdir("test://directory/in-a-directory", false).await.is_err());
    }

    #[tokio::test]
    async fn test_rmdir_recursive_stops_at_root() {
        let (fs, _dir, root) = setup();
        fs.mkdir("test://a/b/c", 0o777, true).await.unwrap();

        fs.rmdir("test://a/b/c", true).await.unwrap();
        assert!(!root.join("a").exists());
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_rmdir_recursive_on_root_is_refused() {
        let (fs, _dir, root) = setup();

        for path in ["test://", "test:///"] {
            let result = fs.rmdir(path, true).await;
            assert!(matches!(result, Err(VfsError::ProtectedRoot(_))), "{path}");
        }
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_rmdir_recursive_fails_on_non_empty_parent() {
        let (fs, _dir, root) = setup();
        fs.mkdir("test://a/b/c", 0o777, true).await.unwrap();
        std::fs::write(root.join("a/keep.txt"), b"").unwrap();

        assert!(fs.rmdir("test://a/b/c", true).await.is_err());
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep.txt").exists());
    }

    #[tokio::test]
    async fn test_rmdir_recursive_real_path_removes_only_target() {
        let (fs, dir, _root) = setup();
        let nested = dir.path().join("x/y");
        std::fs::create_dir_all(&nested).unwrap();

        fs.rmdir(nested.to_str().unwrap(), true).await.unwrap();
        assert!(!nested.exists());
        assert!(dir.path().join("x").is_dir());
    }

    #[tokio::test]
    async fn test_rename() {
        let (fs, _dir, root) = setup();
        fs.set_metadata("test://file.ext", MetadataChange::Touch { mtime: None, atime: None })
            .await
            .unwrap();

        fs.rename("test://file.ext", "test://file.ext2").await.unwrap();
        assert!(!root.join("file.ext").exists());
        assert!(root.join("file.ext2").exists());

        let missing = fs.rename("test://file.ext", "test://file.ext3").await;
        assert!(matches!(missing, Err(VfsError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_unlink() {
        let (fs, _dir, root) = setup();
        fs.mkdir("test://directory", 0o777, false).await.unwrap();
        fs.write_all("test://directory/with-a-file.ext", b"").await.unwrap();

        fs.unlink("test://directory/with-a-file.ext").await.unwrap();
        assert!(!root.join("directory/with-a-file.ext").exists());
        assert!(fs.unlink("test://directory/with-a-file.ext").await.is_err());
    }

    #[tokio::test]
    async fn test_touch_sets_times() {
        let (fs, _dir, root) = setup();
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        fs.set_metadata(
            "test://stamped",
            MetadataChange::Touch {
                mtime: Some(when),
                atime: Some(when),
            },
        )
        .await
        .unwrap();

        let meta = std::fs::metadata(root.join("stamped")).unwrap();
        assert_eq!(meta.mtime(), 1_000_000);
        assert_eq!(meta.atime(), 1_000_000);
    }

    #[tokio::test]
    async fn test_touch_keeps_contents() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("f"), b"keep").unwrap();
        fs.set_metadata("test://f", MetadataChange::Touch { mtime: None, atime: None })
            .await
            .unwrap();
        assert_eq!(std::fs::read(root.join("f")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_chmod() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("f"), b"").unwrap();
        fs.set_metadata("test://f", MetadataChange::Access(0o600))
            .await
            .unwrap();
        let mode = std::fs::metadata(root.join("f")).unwrap().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_chown_to_self() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("f"), b"").unwrap();
        let meta = std::fs::metadata(root.join("f")).unwrap();

        fs.set_metadata("test://f", MetadataChange::Owner(meta.uid()))
            .await
            .unwrap();
        fs.set_metadata("test://f", MetadataChange::Group(meta.gid()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chown_unknown_user() {
        let (fs, _dir, root) = setup();
        std::fs::write(root.join("f"), b"").unwrap();
        let result = fs
            .set_metadata(
                "test://f",
                MetadataChange::OwnerName("no-such-user-schemefs".into()),
            )
            .await;
        assert!(matches!(result, Err(VfsError::UnknownUser(_))));
    }
}
