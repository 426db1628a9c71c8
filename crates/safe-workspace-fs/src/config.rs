//! Serializable configuration for a confined workspace.

use crate::error::{Result, SafeFsError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default reserved subpath for temporary directories.
pub const DEFAULT_TMP_DIR: &str = ".tmp";

/// Configuration for a [`SafeFs`](crate::SafeFs) instance.
///
/// ```toml
/// root = "/srv/workspace"
/// readonly = false
/// dry_run = true
/// tmp_dir = ".tmp"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Existing directory all operations are confined to
    pub root: PathBuf,

    /// Block every mutating operation
    #[serde(default)]
    pub readonly: bool,

    /// Return plans instead of performing destructive operations
    #[serde(default)]
    pub dry_run: bool,

    /// Workspace subpath reserved for temporary directories
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
}

fn default_tmp_dir() -> String {
    DEFAULT_TMP_DIR.to_string()
}

impl SandboxConfig {
    /// Configuration with both policy flags off and the default tmp subpath.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: false,
            dry_run: false,
            tmp_dir: default_tmp_dir(),
        }
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns `Configuration` if the text is not valid TOML for this struct.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SafeFsError::Configuration {
            message: format!("invalid sandbox configuration: {e}"),
        })
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Configuration` if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| SafeFsError::Configuration {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Sandbox configuration loaded from {}", path.display());
        Ok(config)
    }
}
