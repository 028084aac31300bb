//! Error types for the relayer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Relayer error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
    /// Malformed action payload. Rejected before signing.
    #[error("decode error: {0}")]
    Decode(String),
    /// Signature does not recover to the expected or an authorized signer.
    #[error("authorization error: {0}")]
    Authorization(String),
    /// Signer exceeded the quota of its tier for this action key.
    #[error("rate limit exceeded for {key}: {tier} tier allows {limit} per {window_secs}s")]
    RateLimitExceeded {
        key: String,
        tier: &'static str,
        limit: u64,
        window_secs: u64,
    },
    /// Chain rejected or failed to execute a submitted transaction.
    #[error("submission error: {0}")]
    Submission(String),
    /// Cross-chain attestation or redemption failed.
    #[error("attestation error: {message}")]
    Attestation { message: String, recoverable: bool },
    /// RPC communication error.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// Coordination store error.
    #[error("store error: {0}")]
    Store(String),
    /// Same request is already being processed.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn attestation(message: impl Into<String>, recoverable: bool) -> Self {
        Error::Attestation {
            message: message.into(),
            recoverable,
        }
    }

    /// Whether the wormhole redeem phase should try again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Attestation { recoverable, .. } => *recoverable,
            Error::Rpc(_) | Error::Store(_) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Decode(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Authorization(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Submission(_) | Error::Rpc(_) => StatusCode::BAD_GATEWAY,
            Error::Attestation { .. } => StatusCode::BAD_GATEWAY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Store(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Error::RateLimitExceeded {
                key,
                tier,
                limit,
                window_secs,
            } => serde_json::json!({
                "success": false,
                "error": self.to_string(),
                "key": key,
                "tier": tier,
                "limit": limit,
                "retry_after_secs": window_secs,
            }),
            _ => serde_json::json!({
                "success": false,
                "error": self.to_string()
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::Decode("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Authorization("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        let limited = Error::RateLimitExceeded {
            key: "CreateTrack".into(),
            tier: "app",
            limit: 3,
            window_secs: 3600,
        };
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Error::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::attestation("vaa not ready", true).is_recoverable());
        assert!(!Error::attestation("no sequence", false).is_recoverable());
        assert!(Error::Rpc("timeout".into()).is_recoverable());
        assert!(!Error::Submission("reverted".into()).is_recoverable());
    }
}
