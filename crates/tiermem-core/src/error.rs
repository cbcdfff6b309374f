//! Error types for tiermem-core.

use thiserror::Error;

/// Result type alias using the tiermem-core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected input (unknown enum value, empty identifier, bad config value)
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// A required record does not exist
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record or index document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store lock poisoned by a panicking writer
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Indices disagree with a rebuild from a full scan
    #[error("index corruption: {dangling} dangling, {missing} missing references")]
    IndexCorruption { dangling: usize, missing: usize },
}

impl Error {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Config(_))
    }

    /// Check if the persistent medium could not be read or written
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Database(_) => true,
            Self::Io(_) | Self::LockPoisoned => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("level", "unknown value 'shortterm'");
        assert!(err.is_validation());
        assert!(err.to_string().contains("level"));
        assert!(err.to_string().contains("shortterm"));

        let err = Error::not_found("context", "S1");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("context"));
        assert!(err.to_string().contains("S1"));
    }

    #[test]
    fn test_storage_classification() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro"));
        assert!(err.is_storage_unavailable());
        assert!(Error::LockPoisoned.is_storage_unavailable());
        assert!(!Error::validation("x", "y").is_storage_unavailable());
        assert!(!Error::IndexCorruption { dangling: 1, missing: 0 }.is_storage_unavailable());
    }
}
