//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for bus and lock-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Bus and lock-store error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A call to the bus or key-value store failed.
    #[error("{operation} failed: {reason}")]
    Transport { operation: String, reason: String },

    /// Atomic create found an existing record.
    #[error("key '{key}' already exists")]
    KeyExists { key: String },

    /// Notification bytes could not be decoded.
    #[error("malformed notification: {reason}")]
    MalformedNotification { reason: String },

    /// Notification could not be encoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// No stream carries the requested subject.
    #[error("no stream configured for subject '{subject}'")]
    StreamNotFound { subject: String },
}

impl Error {
    /// Create a transport error.
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a key-exists error.
    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    /// Create a malformed notification error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedNotification {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a stream-not-found error.
    pub fn stream_not_found(subject: impl Into<String>) -> Self {
        Self::StreamNotFound {
            subject: subject.into(),
        }
    }

    /// Whether this error reports an existing key.
    #[must_use]
    pub const fn is_key_exists(&self) -> bool {
        matches!(self, Self::KeyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport("kv get", "connection reset");
        assert!(err.to_string().contains("kv get"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_key_exists() {
        let err = Error::key_exists("WorkloadInstanceReconciler.42");
        assert!(err.is_key_exists());
        assert!(!Error::malformed("bad").is_key_exists());
    }
}
