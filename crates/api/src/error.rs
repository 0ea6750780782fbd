//! Error types for API server calls.

use thiserror::Error;

/// Result type for API server calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors returned by the API server collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    /// The write conflicts with existing state.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// The request was rejected as invalid.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The API server could not be reached.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The API server answered with an unexpected status.
    #[error("API server returned {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {reason}")]
    Decode { reason: String },

    /// Client configuration is unusable.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl ApiError {
    /// Create a not-found error.
    #[must_use]
    pub const fn not_found(kind: &'static str, id: u64) -> Self {
        Self::NotFound { kind, id }
    }

    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the object was missing, as opposed to the call failing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguished() {
        let err = ApiError::not_found("WorkloadDefinition", 4);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "WorkloadDefinition 4 not found");
        assert!(!ApiError::transport("refused").is_not_found());
    }

    #[test]
    fn test_server_error_display() {
        let err = ApiError::Server {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }
}
