//! Host configuration.
//!
//! Loaded from a TOML file: the `--config` flag, or
//! `~/.config/melty/config.toml` if present, else defaults. An explicitly
//! given path that cannot be read or parsed is an error; a missing default
//! file is not.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    /// Workspace root the engine operates in.
    pub workspace: PathBuf,
    /// Remote that pull-request pushes target.
    pub remote: String,
    /// Prefix for task branches (`<prefix>/<task-short-id>`).
    pub branch_prefix: String,
    /// Task database location. `None` keeps tasks in memory only.
    pub store_path: Option<PathBuf>,
    /// What `getAssistantDescription` answers.
    pub assistant_description: String,
    /// What `getVSCodeTheme` answers.
    pub theme: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            remote: "origin".to_string(),
            branch_prefix: "melty".to_string(),
            store_path: None,
            assistant_description:
                "Melty, an AI pair programmer that works in small, reviewable commits".to_string(),
            theme: "dark".to_string(),
        }
    }
}

impl HostConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(explicit) => Some(explicit.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config =
            toml::from_str(&contents).with_context(|| format!("invalid config at {}", path.display()))?;
        Ok(config)
    }

    /// `~/.config/melty/config.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("melty").join("config.toml"))
    }

    /// Default task database location under the platform data dir.
    pub fn default_store_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("melty")
            .join("tasks.db")
    }
}
