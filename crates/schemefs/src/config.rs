//! Declarative scheme bindings.
//!
//! A TOML file lists the schemes to bind at startup:
//!
//! ```toml
//! [[scheme]]
//! name = "app"
//! root = "~/.local/share/app"
//! create = true        # create the root if missing (default: false)
//! mode = 0o750         # mode for a created root (default: 0o777)
//! ```
//!
//! Roots are expanded with `~` and `$VAR` substitution before binding.

use serde::Deserialize;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::registry::SchemeRegistry;
use crate::vfs::{VfsError, VfsResult};

/// Default mode for roots created from config.
const DEFAULT_ROOT_MODE: u32 = 0o777;

/// Parsed scheme configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemeConfig {
    #[serde(default, rename = "scheme")]
    pub schemes: Vec<SchemeEntry>,
}

/// One `[[scheme]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemeEntry {
    pub name: String,
    pub root: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    DEFAULT_ROOT_MODE
}

impl SchemeEntry {
    /// Root with `~` and environment variables expanded.
    pub fn expanded_root(&self) -> VfsResult<PathBuf> {
        shellexpand::full(&self.root)
            .map(|s| PathBuf::from(s.as_ref()))
            .map_err(|e| VfsError::config(format!("scheme {}: {e}", self.name)))
    }
}

impl SchemeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        toml::from_str(text).map_err(|e| VfsError::config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Bind every configured scheme in `registry`, in file order.
    ///
    /// Stops at the first entry that fails. Entries bound before the
    /// failure stay registered.
    pub fn apply(&self, registry: &SchemeRegistry) -> VfsResult<()> {
        for entry in &self.schemes {
            let root = entry.expanded_root()?;
            if entry.create && !root.is_dir() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(entry.mode)
                    .create(&root)
                    .map_err(|e| {
                        VfsError::setup(format!(
                            "unable to create {}:// root {}: {e}",
                            entry.name,
                            root.display()
                        ))
                    })?;
                info!(scheme = %entry.name, root = %root.display(), "created scheme root");
            }
            registry.register(&entry.name, &root)?;
        }
        Ok(())
    }
}
