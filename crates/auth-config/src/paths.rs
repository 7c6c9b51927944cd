//! File system paths for the auth client.

use crate::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Manages file system paths for the CLI and its storage.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.authctl)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.authctl`.
    pub fn new() -> ConfigResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".authctl"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (~/.authctl/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Directory holding the persisted session and PKCE verifier.
    pub fn storage_dir(&self) -> PathBuf {
        self.base_dir.join("storage")
    }

    /// Ensure the base directory exists.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
