//! Error types for b2pilot-core

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for b2pilot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for b2pilot-core
#[derive(Error, Debug)]
pub enum Error {
    /// Authorization against the account failed
    ///
    /// The cause is shared by every caller that waited on the same refresh.
    #[error("Authorization failed: {0}")]
    Auth(#[source] Arc<Error>),

    /// A request exhausted its retry budget without a 2xx response
    #[error("{method} {url} failed after {attempts} attempt(s): {reason}")]
    Transport {
        method: String,
        url: String,
        attempts: u32,
        reason: FailureReason,
    },

    /// The service stored content whose hash differs from what was sent
    #[error("Content SHA-1 mismatch for '{file_name}': sent {expected}, service reported {actual}")]
    IntegrityMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),
}

impl Error {
    /// Whether a fresh attempt of the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { reason, .. } => reason.is_transient(),
            Error::Auth(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// HTTP status of the last failed attempt, if the service answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport {
                reason: FailureReason::Status { status, .. },
                ..
            } => Some(*status),
            Error::Auth(inner) => inner.status(),
            _ => None,
        }
    }
}

/// Why the last attempt of a request failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The service answered outside [200, 300)
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// The attempt did not finish within the configured timeout
    Timeout,
    /// Connection, TLS or body read failure
    Network(String),
}

impl FailureReason {
    /// Timeouts, network failures, 408, 429 and 5xx are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            FailureReason::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            FailureReason::Timeout | FailureReason::Network(_) => true,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status {
                status,
                code: Some(code),
                message,
            } => write!(f, "HTTP {} ({}): {}", status, code, message),
            FailureReason::Status {
                status, message, ..
            } => write!(f, "HTTP {}: {}", status, message),
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Network(msg) => write!(f, "network error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for FailureReason {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FailureReason::Timeout
        } else {
            FailureReason::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(reason: FailureReason) -> Error {
        Error::Transport {
            method: "GET".to_string(),
            url: "https://api.example.com".to_string(),
            attempts: 3,
            reason,
        }
    }

    #[test]
    fn test_transient_reasons() {
        assert!(FailureReason::Timeout.is_transient());
        assert!(FailureReason::Network("reset".to_string()).is_transient());
        assert!(FailureReason::Status {
            status: 503,
            code: None,
            message: String::new()
        }
        .is_transient());
        assert!(!FailureReason::Status {
            status: 401,
            code: Some("unauthorized".to_string()),
            message: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_auth_error_exposes_inner_status() {
        let err = Error::Auth(Arc::new(transport(FailureReason::Status {
            status: 401,
            code: Some("bad_auth_token".to_string()),
            message: "invalid".to_string(),
        })));
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_display() {
        let err = transport(FailureReason::Status {
            status: 400,
            code: Some("bad_request".to_string()),
            message: "bucketId invalid".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "GET https://api.example.com failed after 3 attempt(s): HTTP 400 (bad_request): bucketId invalid"
        );
        assert_eq!(transport(FailureReason::Timeout).status(), None);
    }
}
