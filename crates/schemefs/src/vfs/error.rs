//! Scheme filesystem error types.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Scheme filesystem error type.
///
/// Failures from the OS keep their `io::Error` as the source, so the raw OS
/// code is always the one the native call returned.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {path}")]
    NotFound {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Path already exists.
    #[error("already exists: {path}")]
    AlreadyExists {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Permission denied (`EACCES` or `EPERM`).
    #[error("permission denied: {path}")]
    PermissionDenied {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Expected a directory.
    #[error("not a directory: {path}")]
    NotADirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Expected a file.
    #[error("is a directory: {path}")]
    IsADirectory {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Directory not empty.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Recursive removal aimed at a scheme's bound root.
    #[error("refusing to remove scheme root: {0}")]
    ProtectedRoot(String),

    /// Scheme name rejected at registration.
    #[error("invalid scheme name: {0:?}")]
    InvalidScheme(String),

    /// Root directory could not be bound.
    #[error("cannot bind root {root}: {reason}")]
    InvalidRoot { root: String, reason: String },

    /// A precondition of registration (e.g. creating the root) failed.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Unparsable open mode string.
    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),

    /// Host selector value with no known meaning.
    #[error("unknown {kind} selector: {value}")]
    UnknownSelector { kind: &'static str, value: i64 },

    /// User name with no passwd entry.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Group name with no group entry.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// Operation on a handle that was already closed.
    #[error("handle is closed")]
    HandleClosed,

    /// Operation not supported on local streams.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create an InvalidRoot error.
    pub fn invalid_root(root: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRoot {
            root: root.into(),
            reason: reason.into(),
        }
    }

    /// Create a Setup error.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify an OS error raised while operating on `path`.
    ///
    /// Common kinds become path-carrying variants; everything else stays
    /// `Io`. Either way the original error is kept.
    pub fn from_io(source: io::Error, path: &Path) -> Self {
        let path = path.display().to_string();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path, source },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path, source },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path, source },
            io::ErrorKind::IsADirectory => Self::IsADirectory { path, source },
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty { path, source },
            _ => Self::Io(source),
        }
    }

    /// The underlying OS error, if the failure came from a native call.
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::NotFound { source, .. }
            | Self::AlreadyExists { source, .. }
            | Self::PermissionDenied { source, .. }
            | Self::NotADirectory { source, .. }
            | Self::IsADirectory { source, .. }
            | Self::DirectoryNotEmpty { source, .. }
            | Self::Io(source) => Some(source),
            _ => None,
        }
    }

    /// Raw OS error code exactly as the native call reported it.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }

    /// Returns true for not-found failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(unix)]
impl From<nix::Error> for VfsError {
    fn from(e: nix::Error) -> Self {
        Self::Io(io::Error::from(e))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound { source, .. }
            | VfsError::AlreadyExists { source, .. }
            | VfsError::PermissionDenied { source, .. }
            | VfsError::NotADirectory { source, .. }
            | VfsError::IsADirectory { source, .. }
            | VfsError::DirectoryNotEmpty { source, .. }
            | VfsError::Io(source) => source,
            VfsError::ProtectedRoot(path) => io::Error::new(io::ErrorKind::PermissionDenied, path),
            VfsError::InvalidMode(msg)
            | VfsError::UnknownUser(msg)
            | VfsError::UnknownGroup(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            e @ (VfsError::InvalidScheme(_)
            | VfsError::InvalidRoot { .. }
            | VfsError::UnknownSelector { .. }) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            VfsError::HandleClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "handle is closed")
            }
            VfsError::Unsupported(what) => io::Error::new(io::ErrorKind::Unsupported, what),
            e @ (VfsError::Setup(_) | VfsError::Config(_) | VfsError::Other(_)) => {
                io::Error::other(e.to_string())
            }
        }
    }
}

/// Scheme filesystem result type.
pub type VfsResult<T> = Result<T, VfsError>;
