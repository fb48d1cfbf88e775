// crates/oracle-server/src/error.rs
// Standardized error types for the Oracle core

use thiserror::Error;

/// Main error type for the Oracle library.
///
/// The first seven variants are the caller-visible error kinds; the rest
/// wrap transport and storage failures and surface as `Upstream` or
/// `Internal` at the query boundary.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using OracleError
pub type Result<T> = std::result::Result<T, OracleError>;

impl OracleError {
    /// Stable kind string used in error events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream(_) => "upstream",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
            Self::Db(_) | Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Anyhow(_) => {
                "internal"
            }
        }
    }

    /// Message safe to surface to callers.
    ///
    /// Internal invariant violations are anonymized; everything else is
    /// descriptive enough to act on.
    pub fn to_user_string(&self) -> String {
        match self {
            Self::Internal(_) | Self::Db(_) | Self::Anyhow(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<String> for OracleError {
    fn from(s: String) -> Self {
        OracleError::Internal(s)
    }
}

impl From<tokio::task::JoinError> for OracleError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            OracleError::Cancelled
        } else {
            OracleError::Internal(err.to_string())
        }
    }
}

impl From<OracleError> for String {
    fn from(err: OracleError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(OracleError::NotFound("tree".into()).kind(), "not_found");
        assert_eq!(OracleError::Cancelled.kind(), "cancelled");
        assert_eq!(
            OracleError::RateLimited { retry_after_ms: 500 }.kind(),
            "rate_limited"
        );
        assert_eq!(OracleError::Internal("bug".into()).kind(), "internal");
    }

    #[test]
    fn test_internal_message_anonymized() {
        let err = OracleError::Internal("invariant broken at chunk 42".into());
        assert_eq!(err.to_user_string(), "an internal error occurred");
        let err = OracleError::NotFound("node n9".into());
        assert!(err.to_user_string().contains("n9"));
    }

    #[test]
    fn test_string_conversion_is_internal() {
        let err: OracleError = String::from("boom").into();
        assert_eq!(err.kind(), "internal");
    }
}
