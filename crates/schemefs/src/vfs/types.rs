//! Core types shared by the typed dispatcher and the fail-soft surface.
//!
//! The host hands most selectors over as plain integers; each typed form
//! here has a `from_raw` constructor that rejects values it does not know.

use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::time::SystemTime;

use super::error::{VfsError, VfsResult};

/// POSIX `stat` record.
///
/// Fields are in the conventional order and can be read by position
/// ([`FileStat::get`]) or by name ([`FileStat::field`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub blksize: u64,
    pub blocks: u64,
}

impl FileStat {
    /// Field names in record order.
    pub const FIELDS: [&'static str; 13] = [
        "dev", "ino", "mode", "nlink", "uid", "gid", "rdev", "size", "atime", "mtime", "ctime",
        "blksize", "blocks",
    ];

    /// Build a record from OS metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            size: meta.size(),
            atime: meta.atime(),
            mtime: meta.mtime(),
            ctime: meta.ctime(),
            blksize: meta.blksize(),
            blocks: meta.blocks(),
        }
    }

    /// Field value by position in the record.
    pub fn get(&self, index: usize) -> Option<i64> {
        let v = match index {
            0 => self.dev as i64,
            1 => self.ino as i64,
            2 => self.mode as i64,
            3 => self.nlink as i64,
            4 => self.uid as i64,
            5 => self.gid as i64,
            6 => self.rdev as i64,
            7 => self.size as i64,
            8 => self.atime,
            9 => self.mtime,
            10 => self.ctime,
            11 => self.blksize as i64,
            12 => self.blocks as i64,
            _ => return None,
        };
        Some(v)
    }

    /// Field value by name.
    pub fn field(&self, name: &str) -> Option<i64> {
        Self::FIELDS
            .iter()
            .position(|f| *f == name)
            .and_then(|i| self.get(i))
    }

    /// All fields in record order.
    pub fn to_array(&self) -> [i64; 13] {
        std::array::from_fn(|i| self.get(i).unwrap_or_default())
    }

    /// File type bits (`S_IFMT`) of `mode`.
    pub fn file_type_bits(&self) -> u32 {
        self.mode & 0o170000
    }

    /// Returns true if the record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == 0o040000
    }

    /// Returns true if the record describes a regular file.
    pub fn is_file(&self) -> bool {
        self.file_type_bits() == 0o100000
    }

    /// Returns true if the record describes a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == 0o120000
    }
}

/// Parsed fopen-style mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl OpenMode {
    /// Parse a mode string such as `"r"`, `"w+"`, `"ab"` or `"x+"`.
    ///
    /// The binary/text/close-on-exec flags (`b`, `t`, `e`) are accepted and
    /// ignored.
    pub fn parse(mode: &str) -> VfsResult<Self> {
        let mut chars = mode.chars();
        let base = chars
            .next()
            .ok_or_else(|| VfsError::InvalidMode(mode.to_string()))?;

        let mut plus = false;
        for c in chars {
            match c {
                '+' if !plus => plus = true,
                'b' | 't' | 'e' => {}
                _ => return Err(VfsError::InvalidMode(mode.to_string())),
            }
        }

        let parsed = match base {
            'r' => Self {
                read: true,
                write: plus,
                ..Default::default()
            },
            'w' => Self {
                read: plus,
                write: true,
                create: true,
                truncate: true,
                ..Default::default()
            },
            'a' => Self {
                read: plus,
                write: true,
                append: true,
                create: true,
                ..Default::default()
            },
            'x' => Self {
                read: plus,
                write: true,
                create: true,
                exclusive: true,
                ..Default::default()
            },
            'c' => Self {
                read: plus,
                write: true,
                create: true,
                ..Default::default()
            },
            _ => return Err(VfsError::InvalidMode(mode.to_string())),
        };
        Ok(parsed)
    }

    /// Translate into native open options.
    pub fn to_open_options(self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        opts.read(self.read)
            .write(self.write && !self.append)
            .append(self.append)
            .truncate(self.truncate);
        if self.exclusive {
            opts.create_new(true);
        } else {
            opts.create(self.create);
        }
        opts
    }
}

/// Options passed alongside an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Emit warning diagnostics on failure. When unset, failures are only
    /// logged at debug level.
    pub report_errors: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            report_errors: true,
        }
    }
}

impl StreamOptions {
    /// Host bit asking the wrapper to report errors itself.
    pub const REPORT_ERRORS: i32 = 8;

    /// Decode the host's option bits.
    pub fn from_raw(bits: i32) -> Self {
        Self {
            report_errors: bits & Self::REPORT_ERRORS != 0,
        }
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// Host value for [`Whence::Set`] (`SEEK_SET`).
    pub const SET: i32 = 0;
    /// Host value for [`Whence::Current`] (`SEEK_CUR`).
    pub const CURRENT: i32 = 1;
    /// Host value for [`Whence::End`] (`SEEK_END`).
    pub const END: i32 = 2;

    pub fn from_raw(raw: i32) -> VfsResult<Self> {
        match raw {
            Self::SET => Ok(Self::Set),
            Self::CURRENT => Ok(Self::Current),
            Self::END => Ok(Self::End),
            other => Err(VfsError::UnknownSelector {
                kind: "whence",
                value: other as i64,
            }),
        }
    }

    /// Combine with an offset into a `SeekFrom`.
    pub fn seek_from(self, offset: i64) -> VfsResult<SeekFrom> {
        match self {
            Self::Set => u64::try_from(offset)
                .map(SeekFrom::Start)
                .map_err(|_| VfsError::other(format!("negative seek offset: {offset}"))),
            Self::Current => Ok(SeekFrom::Current(offset)),
            Self::End => Ok(SeekFrom::End(offset)),
        }
    }
}

/// Advisory lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOperation {
    pub kind: LockKind,
    /// Fail instead of waiting for a conflicting lock.
    pub non_blocking: bool,
}

/// Advisory lock kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
    Unlock,
}

impl LockOperation {
    /// Host value for a shared lock (`LOCK_SH`).
    pub const SHARED: i32 = 1;
    /// Host value for an exclusive lock (`LOCK_EX`).
    pub const EXCLUSIVE: i32 = 2;
    /// Host value for unlocking (`LOCK_UN`).
    pub const UNLOCK: i32 = 3;
    /// Host bit for non-blocking requests (`LOCK_NB`).
    pub const NON_BLOCKING: i32 = 4;

    pub fn shared() -> Self {
        Self {
            kind: LockKind::Shared,
            non_blocking: false,
        }
    }

    pub fn exclusive() -> Self {
        Self {
            kind: LockKind::Exclusive,
            non_blocking: false,
        }
    }

    pub fn unlock() -> Self {
        Self {
            kind: LockKind::Unlock,
            non_blocking: false,
        }
    }

    /// Same request, without waiting.
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn from_raw(raw: i32) -> VfsResult<Self> {
        let kind = match raw & !Self::NON_BLOCKING {
            Self::SHARED => LockKind::Shared,
            Self::EXCLUSIVE => LockKind::Exclusive,
            Self::UNLOCK => LockKind::Unlock,
            _ => {
                return Err(VfsError::UnknownSelector {
                    kind: "lock",
                    value: raw as i64,
                });
            }
        };
        Ok(Self {
            kind,
            non_blocking: raw & Self::NON_BLOCKING != 0,
        })
    }

    /// The matching `flock(2)` operation.
    pub(crate) fn flock_operation(self) -> rustix::fs::FlockOperation {
        use rustix::fs::FlockOperation;
        match (self.kind, self.non_blocking) {
            (LockKind::Shared, false) => FlockOperation::LockShared,
            (LockKind::Shared, true) => FlockOperation::NonBlockingLockShared,
            (LockKind::Exclusive, false) => FlockOperation::LockExclusive,
            (LockKind::Exclusive, true) => FlockOperation::NonBlockingLockExclusive,
            (LockKind::Unlock, false) => FlockOperation::Unlock,
            (LockKind::Unlock, true) => FlockOperation::NonBlockingUnlock,
        }
    }
}

/// Flags for path-based stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatFlags {
    /// Report a symlink itself rather than its target.
    pub link: bool,
    /// Do not emit diagnostics on failure.
    pub quiet: bool,
}

impl StatFlags {
    /// Host bit for [`StatFlags::link`].
    pub const LINK: i32 = 1;
    /// Host bit for [`StatFlags::quiet`].
    pub const QUIET: i32 = 2;

    pub fn from_raw(bits: i32) -> Self {
        Self {
            link: bits & Self::LINK != 0,
            quiet: bits & Self::QUIET != 0,
        }
    }
}

/// Value argument accompanying a raw metadata selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    /// No value.
    None,
    /// Touch times: `(mtime, atime)` in seconds since the epoch.
    Times(Option<i64>, Option<i64>),
    /// Integer value (id or mode bits).
    Int(i64),
    /// String value (user or group name).
    Text(String),
}

impl MetaValue {
    fn as_id(&self) -> Option<u32> {
        match self {
            Self::Int(v) => u32::try_from(*v).ok(),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_name(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

/// A single metadata mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataChange {
    /// Create the file if missing, then set times. `None` means now.
    Touch {
        mtime: Option<SystemTime>,
        atime: Option<SystemTime>,
    },
    OwnerName(String),
    Owner(u32),
    GroupName(String),
    Group(u32),
    /// Permission bits.
    Access(u32),
}

impl MetadataChange {
    /// Host selector for [`MetadataChange::Touch`].
    pub const TOUCH: i32 = 1;
    /// Host selector for [`MetadataChange::OwnerName`].
    pub const OWNER_NAME: i32 = 2;
    /// Host selector for [`MetadataChange::Owner`].
    pub const OWNER: i32 = 3;
    /// Host selector for [`MetadataChange::GroupName`].
    pub const GROUP_NAME: i32 = 4;
    /// Host selector for [`MetadataChange::Group`].
    pub const GROUP: i32 = 5;
    /// Host selector for [`MetadataChange::Access`].
    pub const ACCESS: i32 = 6;

    /// Decode a host selector and its value.
    ///
    /// Unknown selectors, and values of the wrong shape for a known
    /// selector, are errors.
    pub fn from_raw(option: i32, value: MetaValue) -> VfsResult<Self> {
        let bad_value = || VfsError::UnknownSelector {
            kind: "metadata value for",
            value: option as i64,
        };

        match option {
            Self::TOUCH => {
                let (mtime, atime) = match value {
                    MetaValue::Times(m, a) => (m, a),
                    MetaValue::Int(m) => (Some(m), None),
                    _ => (None, None),
                };
                Ok(Self::Touch {
                    mtime: mtime.map(epoch_secs),
                    atime: atime.or(mtime).map(epoch_secs),
                })
            }
            Self::OWNER_NAME => value.as_name().map(Self::OwnerName).ok_or_else(bad_value),
            Self::OWNER => value.as_id().map(Self::Owner).ok_or_else(bad_value),
            Self::GROUP_NAME => value.as_name().map(Self::GroupName).ok_or_else(bad_value),
            Self::GROUP => value.as_id().map(Self::Group).ok_or_else(bad_value),
            Self::ACCESS => value.as_id().map(Self::Access).ok_or_else(bad_value),
            other => Err(VfsError::UnknownSelector {
                kind: "metadata",
                value: other as i64,
            }),
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Touch { .. } => "touch",
            Self::OwnerName(_) | Self::Owner(_) => "chown",
            Self::GroupName(_) | Self::Group(_) => "chgrp",
            Self::Access(_) => "chmod",
        }
    }
}

fn epoch_secs(secs: i64) -> SystemTime {
    let delta = std::time::Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + delta
    } else {
        SystemTime::UNIX_EPOCH - delta
    }
}
