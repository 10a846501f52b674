//! Scheme registry: binds scheme names to real root directories.
//!
//! Resolution is a plain prefix substitution. `app://sub/file.txt` with
//! `app` bound to `/srv/app` resolves to `/srv/app/sub/file.txt`; anything
//! that does not start with a registered `scheme://` is returned unchanged.
//! No normalization or traversal checks are applied to the remainder.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::vfs::{VfsError, VfsResult};

/// Separator between scheme name and relative path.
pub const SCHEME_SEPARATOR: &str = "://";

/// A scheme name bound to its canonical root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Scheme name (e.g., "app").
    pub scheme: String,
    /// Canonical absolute root directory.
    pub root: PathBuf,
}

/// Result of resolving a virtual path against a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Scheme that matched.
    pub scheme: String,
    /// Root bound to that scheme.
    pub root: PathBuf,
    /// Real filesystem path.
    pub real: PathBuf,
}

/// Process-level table of scheme bindings.
///
/// Held behind an `Arc` and handed to the dispatcher, so tests can create
/// isolated registries. Iteration (and thus first-match resolution) follows
/// registration order.
pub struct SchemeRegistry {
    bindings: RwLock<IndexMap<String, PathBuf>>,
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("bindings", &*self.bindings.read())
            .finish()
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(IndexMap::new()),
        }
    }

    /// Bind `scheme` to `root`.
    ///
    /// The root is canonicalized once, here. It must exist and be a
    /// directory. Re-registering a scheme replaces its root.
    pub fn register(&self, scheme: &str, root: impl AsRef<Path>) -> VfsResult<()> {
        validate_scheme(scheme)?;

        let root = root.as_ref();
        let canonical = dunce::canonicalize(root)
            .map_err(|e| VfsError::invalid_root(root.display().to_string(), e.to_string()))?;
        if !canonical.is_dir() {
            return Err(VfsError::invalid_root(
                root.display().to_string(),
                "not a directory",
            ));
        }

        let previous = self
            .bindings
            .write()
            .insert(scheme.to_string(), canonical.clone());

        match previous {
            Some(old) if old != canonical => info!(
                scheme,
                old = %old.display(),
                root = %canonical.display(),
                "rebound scheme"
            ),
            Some(_) => debug!(scheme, root = %canonical.display(), "scheme re-registered"),
            None => info!(scheme, root = %canonical.display(), "registered scheme"),
        }
        Ok(())
    }

    /// Remove a scheme binding.
    ///
    /// Returns `true` if a binding was removed, `false` if the scheme was
    /// never registered.
    pub fn unregister(&self, scheme: &str) -> bool {
        let removed = self.bindings.write().shift_remove(scheme).is_some();
        if removed {
            info!(scheme, "unregistered scheme");
        } else {
            debug!(scheme, "unregister of unknown scheme ignored");
        }
        removed
    }

    /// Root bound to a scheme.
    pub fn root(&self, scheme: &str) -> Option<PathBuf> {
        self.bindings.read().get(scheme).cloned()
    }

    /// Returns true if the scheme is bound.
    pub fn is_registered(&self, scheme: &str) -> bool {
        self.bindings.read().contains_key(scheme)
    }

    /// All bindings, in registration order.
    pub fn bindings(&self) -> Vec<Binding> {
        self.bindings
            .read()
            .iter()
            .map(|(scheme, root)| Binding {
                scheme: scheme.clone(),
                root: root.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Match `path` against the bindings.
    ///
    /// The first binding (in registration order) whose `scheme://` prefix
    /// starts `path` wins.
    pub fn lookup(&self, path: &str) -> Option<Resolved> {
        let bindings = self.bindings.read();
        bindings.iter().find_map(|(scheme, root)| {
            let rest = path
                .strip_prefix(scheme.as_str())?
                .strip_prefix(SCHEME_SEPARATOR)?;
            Some(Resolved {
                scheme: scheme.clone(),
                root: root.clone(),
                real: join_root(root, rest),
            })
        })
    }

    /// Rewrite a virtual path into a real one.
    ///
    /// Paths without a registered scheme prefix are returned unchanged.
    pub fn resolve(&self, path: &str) -> PathBuf {
        match self.lookup(path) {
            Some(resolved) => resolved.real,
            None => PathBuf::from(path),
        }
    }
}

/// `root + "/" + rest`, as a literal concatenation.
fn join_root(root: &Path, rest: &str) -> PathBuf {
    let mut joined = root.as_os_str().to_os_string();
    if !rest.is_empty() {
        joined.push("/");
        joined.push(rest);
    }
    PathBuf::from(joined)
}

/// Scheme names: an ASCII letter followed by letters, digits, `+`, `-`, `.`.
fn validate_scheme(scheme: &str) -> VfsResult<()> {
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(VfsError::InvalidScheme(scheme.to_string()))
    }
}
