//! Error types for prefstore.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. A missing key is never an error: reads fall back to
//! the caller's default.

use thiserror::Error;

/// Validation errors raised before any request reaches a backend.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Preference key cannot be empty")]
    EmptyKey,

    #[error("Namespace component '{component}' cannot be empty")]
    EmptyNamespaceComponent {
        component: &'static str,
    },

    #[error("Namespace component '{component}' has invalid value '{value}' (allowed: A-Z a-z 0-9 . _ -)")]
    InvalidNamespaceComponent {
        component: &'static str,
        value: String,
    },

    #[error("Value for key '{key}' is not a finite number")]
    NonFiniteNumber {
        key: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error ({context}): {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Wraps an I/O error with a short description of the failed step.
    #[must_use]
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn poisoned(context: &'static str) -> Self {
        Self::Backend(format!("poisoned lock: {context}"))
    }
}

/// Top-level error type for prefstore.
#[derive(Debug, Error)]
pub enum PrefError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Watch stream disconnected")]
    Disconnected,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PrefError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this error may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(StorageError::Io { source, .. }) => matches!(
                source.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PrefError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for prefstore operations.
pub type PrefResult<T> = Result<T, PrefError>;
