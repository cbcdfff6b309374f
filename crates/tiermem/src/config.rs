//! Configuration management for tiermem.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Command line flags (--store, --backend)
//! 2. Environment variables (TIERMEM_STORE_PATH, TIERMEM_BACKEND)
//! 3. Config file (TIERMEM_CONFIG or <data dir>/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tiermem_core::{BackendKind, StoreConfig, TieredStore};
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store settings (`[store]` table)
    pub store: StoreConfig,
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "tiermem", "tiermem") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tiermem")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::sqlite(default_data_dir().join("tiermem.db")),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults when it does not exist.
    ///
    /// A relative store path in the file is resolved against the file's directory.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if config.store.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.store.path = dir.join(&config.store.path);
            }
        }
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `TIERMEM_STORE_PATH` / `TIERMEM_BACKEND` overrides.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("TIERMEM_STORE_PATH").filter(|p| !p.is_empty()) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(backend) = var("TIERMEM_BACKEND").filter(|b| !b.is_empty()) {
            self.store.backend = backend
                .parse::<BackendKind>()
                .context("Invalid TIERMEM_BACKEND")?;
        }
        Ok(())
    }

    /// Apply command line overrides.
    pub fn apply_flags(&mut self, store: Option<PathBuf>, backend: Option<BackendKind>) {
        if let Some(path) = store {
            self.store.path = path;
        }
        if let Some(backend) = backend {
            self.store.backend = backend;
        }
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TIERMEM_CONFIG") {
            PathBuf::from(path)
        } else {
            default_data_dir().join("config.toml")
        }
    }

    /// Open the configured store.
    pub fn open_store(&self) -> Result<TieredStore> {
        TieredStore::open(self.store.clone()).with_context(|| {
            format!(
                "Failed to open {} store at {}",
                self.store.backend,
                self.store.path.display()
            )
        })
    }
}
