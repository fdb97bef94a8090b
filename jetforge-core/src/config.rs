//! Tool configuration
//!
//! A small YAML file configures where the package cache lives and which
//! shell profile receives environment exports. Missing file means
//! defaults; CLI flags override loaded values.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// jetforge configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root directory of the package cache.
    pub cache_root: PathBuf,

    /// Shell profile receiving environment exports (defaults to the
    /// user's `.bashrc`).
    #[serde(default)]
    pub profile_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            profile_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from_path(default_config_path()?)
    }

    /// Load configuration from a specific path, falling back to
    /// defaults when the file does not exist.
    pub fn load_from_path(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// The shell profile to write environment exports into.
    pub fn profile(&self) -> PathBuf {
        self.profile_path.clone().unwrap_or_else(default_profile)
    }
}

fn default_config_path() -> Result<PathBuf> {
    let config_dir = directories::ProjectDirs::from("io", "jetforge", "jetforge")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .context("Could not determine config directory")?;
    Ok(config_dir.join("config.yaml"))
}

fn default_cache_root() -> PathBuf {
    directories::ProjectDirs::from("io", "jetforge", "jetforge")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".jetforge/cache"))
}

fn default_profile() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".bashrc"))
        .unwrap_or_else(|| PathBuf::from(".bashrc"))
}
