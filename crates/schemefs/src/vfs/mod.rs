//! Resolve-then-delegate filesystem layer.
//!
//! Key components:
//!
//! - [`SchemeOps`] - Typed operations on virtual-or-real paths
//! - [`LocalFs`] - Local filesystem implementation over a registry
//! - [`StreamHandle`] / [`DirHandle`] - Open stream and directory sessions
//!
//! ## Design Decisions
//!
//! - **Prefix substitution only**: resolution concatenates the bound root
//!   and the remainder of the path. `..` is not checked.
//! - **Typed errors underneath**: everything here returns [`VfsResult`]; the
//!   fail-soft sentinels live one layer up in [`crate::StreamWrapper`].
//! - **Explicit handle state**: handles are open or closed, never reopened.

mod error;
mod handle;
mod local;
mod ops;
mod types;

pub use error::{VfsError, VfsResult};
pub use handle::{DirHandle, StreamHandle};
pub use local::LocalFs;
pub use ops::SchemeOps;
pub use types::{
    FileStat, LockKind, LockOperation, MetaValue, MetadataChange, OpenMode, StatFlags,
    StreamOptions, Whence,
};
