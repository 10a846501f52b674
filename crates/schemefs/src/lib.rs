//! # schemefs
//!
//! Named filesystem schemes bound to real directories.
//!
//! Register `app` against `/srv/app` and `app://logs/today.txt` addresses
//! `/srv/app/logs/today.txt`. Every operation resolves its path and then
//! forwards to the local filesystem:
//!
//! - [`SchemeRegistry`] - scheme name → canonical root bindings
//! - [`LocalFs`] - typed operations (`VfsResult`) over a registry
//! - [`StreamWrapper`] - fail-soft surface for host runtimes
//! - [`SchemeConfig`] - bindings loaded from TOML

pub mod config;
pub mod registry;
pub mod vfs;
pub mod wrapper;

pub use config::{SchemeConfig, SchemeEntry};
pub use registry::{Binding, Resolved, SchemeRegistry};
pub use vfs::{
    DirHandle, FileStat, LocalFs, LockKind, LockOperation, MetaValue, MetadataChange, OpenMode,
    SchemeOps, StatFlags, StreamHandle, StreamOptions, VfsError, VfsResult, Whence,
};
pub use wrapper::{Diagnostic, RECURSIVE, StreamWrapper};
