//! Error types for the audit recorder
//!
//! Two failure families reach callers of `AuditingService::record`:
//! serialization failures (a producer bug, never retried) and storage
//! failures (the caller owns the retry policy). Both are surfaced as-is.
//! `AuditingService::from_config` can also refuse an invalid configuration.

use std::time::Duration;
use thiserror::Error;

/// Failure to render an envelope into its canonical byte form.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Payload nests too deep: depth {depth} exceeds ceiling {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("Value is not serializable: {context} - {source}")]
    Unserializable {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Canonical encoding failed: {message}")]
    Canonical { message: String },
}

impl SerializationError {
    /// Create an unserializable-value error
    pub fn unserializable(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Unserializable {
            context: context.into(),
            source,
        }
    }

    /// Create a canonical encoding error
    pub fn canonical(message: impl Into<String>) -> Self {
        Self::Canonical {
            message: message.into(),
        }
    }
}

/// Failure to persist rendered bytes, or to read them back.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O operation failed: {operation} - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database operation failed: {operation} - {source}")]
    Database {
        operation: String,
        #[source]
        source: sled::Error,
    },

    #[error("Record already exists with different content: {key}")]
    Conflict { key: String },

    #[error("Store did not complete within {after:?}")]
    Timeout { after: Duration },

    #[error("Reference does not belong to this sink: {reference}")]
    InvalidReference { reference: String },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Background task failed: {operation}")]
    Join { operation: String },

    #[error("Store abandoned before the record was published: {key}")]
    Abandoned { key: String },
}

impl StorageError {
    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, source: sled::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    pub fn invalid_reference(reference: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn join(operation: impl Into<String>) -> Self {
        Self::Join {
            operation: operation.into(),
        }
    }

    pub fn abandoned(key: impl Into<String>) -> Self {
        Self::Abandoned { key: key.into() }
    }
}

/// Error returned by a `record` call.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit record could not be rendered: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Audit record could not be stored: {0}")]
    Storage(#[from] StorageError),

    #[error("Auditing is misconfigured: {0}")]
    Config(#[from] ConfigError),
}

/// Type alias for Result with AuditError
pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    /// True for failures the caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuditError::Serialization(_) | AuditError::Config(_) => false,
            AuditError::Storage(StorageError::Conflict { .. })
            | AuditError::Storage(StorageError::InvalidReference { .. })
            | AuditError::Storage(StorageError::NotFound { .. }) => false,
            AuditError::Storage(_) => true,
        }
    }
}

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Configuration error: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SerializationError::DepthExceeded { depth: 12, max: 10 };
        assert!(err.to_string().contains("exceeds ceiling 10"));

        let err = StorageError::conflict("Package/foo-20240101000000-abc");
        assert!(err.to_string().contains("Package/foo"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let audit_err = AuditError::from(StorageError::io("writing record", io_err));

        assert!(audit_err.source().is_some());
        assert!(audit_err.to_string().contains("I/O operation failed"));
    }

    #[test]
    fn test_retry_classification() {
        let depth = AuditError::from(SerializationError::DepthExceeded { depth: 11, max: 10 });
        assert!(!depth.is_retryable());

        let timeout = AuditError::from(StorageError::Timeout {
            after: Duration::from_millis(5),
        });
        assert!(timeout.is_retryable());

        let conflict = AuditError::from(StorageError::conflict("k"));
        assert!(!conflict.is_retryable());

        let abandoned = AuditError::from(StorageError::abandoned("k"));
        assert!(abandoned.is_retryable());

        let config = AuditError::from(ConfigError::invalid("application", "cannot be empty"));
        assert!(!config.is_retryable());
    }
}
