//! Store Configuration
//!
//! Defines configuration options for the tiered memory store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entry::MemoryLevel;

/// Storage medium
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single SQLite database file
    #[default]
    Sqlite,
    /// Directory tree of JSON documents
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "file" => Ok(Self::File),
            other => Err(ConfigValidationError::InvalidValue {
                field: "backend".into(),
                message: format!("unknown backend '{other}' (expected sqlite or file)"),
            }),
        }
    }
}

/// Store configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage medium (default: sqlite)
    pub backend: BackendKind,

    /// SQLite database file, or root directory for the file backend
    pub path: PathBuf,

    /// Maximum entries per level returned by an unfiltered query (default: 20)
    pub recency_limit: usize,

    /// Default time-to-live per level
    pub retention: RetentionConfig,

    /// Interval for the periodic sweeper in seconds (default: 300 = 5 minutes).
    /// `None` disables periodic sweeping.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: PathBuf::from("tiermem.db"),
            recency_limit: 20,
            retention: RetentionConfig::default(),
            sweep_interval_secs: Some(300),
        }
    }
}

/// Default TTLs applied by `TieredStore::create` when the caller gives none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Immediate TTL in seconds (default: 86400 = 24 hours)
    pub immediate_ttl: Option<u64>,

    /// Working TTL in seconds (default: 604800 = 7 days)
    pub working_ttl: Option<u64>,

    /// Long-term TTL in seconds (default: none, never expires)
    pub longterm_ttl: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            immediate_ttl: Some(86_400), // 24 hours
            working_ttl: Some(604_800),  // 7 days
            longterm_ttl: None,
        }
    }
}

impl RetentionConfig {
    /// Default TTL for a level
    pub fn ttl_for(&self, level: MemoryLevel) -> Option<u64> {
        match level {
            MemoryLevel::Immediate => self.immediate_ttl,
            MemoryLevel::Working => self.working_ttl,
            MemoryLevel::Longterm => self.longterm_ttl,
        }
    }
}

impl StoreConfig {
    /// Create a config for the given backend and path
    pub fn new(backend: BackendKind, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
            ..Default::default()
        }
    }

    /// SQLite database at `path`
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::new(BackendKind::Sqlite, path)
    }

    /// JSON file tree rooted at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(BackendKind::File, path)
    }

    /// Set the unfiltered query bound
    pub fn with_recency_limit(mut self, recency_limit: usize) -> Self {
        self.recency_limit = recency_limit;
        self
    }

    /// Set retention configuration
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Set the periodic sweep interval
    pub fn with_sweep_interval(mut self, secs: Option<u64>) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingPath);
        }

        if self.recency_limit == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "recency_limit".into(),
                message: "must be greater than 0".into(),
            });
        }

        for level in MemoryLevel::ALL {
            if self.retention.ttl_for(level) == Some(0) {
                return Err(ConfigValidationError::InvalidValue {
                    field: format!("retention.{level}_ttl"),
                    message: "must be greater than 0 (omit it to disable expiry)".into(),
                });
            }
        }

        if self.sweep_interval_secs == Some(0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "sweep_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("store path is required")]
    MissingPath,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.recency_limit, 20);
        assert_eq!(config.retention.ttl_for(MemoryLevel::Immediate), Some(86_400));
        assert_eq!(config.retention.ttl_for(MemoryLevel::Working), Some(604_800));
        assert_eq!(config.retention.ttl_for(MemoryLevel::Longterm), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::file("/tmp/store")
            .with_recency_limit(5)
            .with_sweep_interval(None);

        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.path, PathBuf::from("/tmp/store"));
        assert_eq!(config.recency_limit, 5);
        assert_eq!(config.sweep_interval_secs, None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::sqlite("");
        assert!(matches!(config.validate(), Err(ConfigValidationError::MissingPath)));

        config.path = PathBuf::from("store.db");
        config.recency_limit = 0;
        assert!(config.validate().is_err());

        config.recency_limit = 10;
        config.retention.working_ttl = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention.working_ttl"));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"backend": "file", "retention": {"longterm_ttl": 60}}"#).unwrap();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.recency_limit, 20);
        assert_eq!(config.retention.immediate_ttl, Some(86_400));
        assert_eq!(config.retention.longterm_ttl, Some(60));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("redis".parse::<BackendKind>().is_err());
    }
}
