//! Error types for castgate
//!
//! Defines one error enum covering the gateway's failure modes: upstream
//! transport, cache, persistence, configuration and caller preconditions.
//! Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Result type alias for castgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors (missing or malformed settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors not raised by SQLite itself
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache service errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Upstream answered with a non-success status
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Upstream has no such resource; a valid negative result
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller bug, e.g. asking whether an account is mutual with itself
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Rate limited (retry-after in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Upstream payload did not match the expected schema
    #[error("Schema error: {0}")]
    Schema(#[from] hub_types::SchemaError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether this error means "the upstream has nothing here"
    pub fn is_not_found(&self) -> bool {
        match self {
            GatewayError::NotFound(_) => true,
            GatewayError::Upstream { status, .. } => *status == 404,
            GatewayError::Http(e) => e.status().map(|s| s.as_u16() == 404).unwrap_or(false),
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::Storage(_) | GatewayError::Database(_) => "storage",
            GatewayError::Cache(_) => "cache",
            GatewayError::Upstream { .. } | GatewayError::Http(_) => "upstream",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Precondition(_) => "precondition",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::Schema(_) | GatewayError::Json(_) | GatewayError::Yaml(_) => "parse",
            GatewayError::Io(_) => "io",
            GatewayError::Other(_) | GatewayError::Anyhow(_) => "other",
        }
    }
}

impl crate::retry::RetryableError for GatewayError {
    fn retry_decision(&self) -> crate::retry::RetryDecision {
        use crate::retry::RetryDecision;
        use std::time::Duration;

        match self {
            GatewayError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    status_decision(status.as_u16())
                } else if e.is_decode() || e.is_builder() {
                    RetryDecision::NoRetry
                } else {
                    RetryDecision::Retry
                }
            }
            GatewayError::Upstream { status, .. } => status_decision(*status),
            GatewayError::RateLimited(secs) => {
                RetryDecision::RetryAfter(Duration::from_secs(*secs))
            }
            GatewayError::Cache(_) => RetryDecision::Retry,
            // Non-retryable errors
            GatewayError::NotFound(_) => RetryDecision::NoRetry,
            GatewayError::Precondition(_) => RetryDecision::NoRetry,
            GatewayError::Config(_) => RetryDecision::NoRetry,
            GatewayError::Storage(_) => RetryDecision::NoRetry,
            GatewayError::Schema(_) => RetryDecision::NoRetry,
            GatewayError::Io(_) => RetryDecision::NoRetry,
            GatewayError::Json(_) => RetryDecision::NoRetry,
            GatewayError::Yaml(_) => RetryDecision::NoRetry,
            GatewayError::Database(_) => RetryDecision::NoRetry,
            GatewayError::Other(_) => RetryDecision::NoRetry,
            GatewayError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}

fn status_decision(status: u16) -> crate::retry::RetryDecision {
    use crate::retry::RetryDecision;
    use std::time::Duration;

    match status {
        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
        408 | 500..=599 => RetryDecision::Retry,
        _ => RetryDecision::NoRetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryDecision, RetryableError};

    #[test]
    fn test_not_found_is_terminal() {
        let err = GatewayError::NotFound("/v1/castById".to_string());
        assert!(err.is_not_found());
        assert_eq!(err.retry_decision(), RetryDecision::NoRetry);
    }

    #[test]
    fn test_upstream_status_classification() {
        let server_error = GatewayError::Upstream {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(server_error.retry_decision(), RetryDecision::Retry);

        let missing = GatewayError::Upstream {
            status: 404,
            message: "gone".to_string(),
        };
        assert!(missing.is_not_found());
        assert_eq!(missing.retry_decision(), RetryDecision::NoRetry);

        let bad_request = GatewayError::Upstream {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(bad_request.retry_decision(), RetryDecision::NoRetry);
    }

    #[test]
    fn test_precondition_never_retried() {
        let err = GatewayError::Precondition("fids must be different".to_string());
        assert_eq!(err.retry_decision(), RetryDecision::NoRetry);
        assert_eq!(err.kind(), "precondition");
    }
}
