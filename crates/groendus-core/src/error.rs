//! Error types for groendus-core.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::Authentication`] | Do not retry inside the pass; fix credentials or wait for the next poll |
//! | [`Error::Api`] | Do not retry; the payload carries the portal's own error list |
//! | [`Error::Http`] | Transient; the next scheduled poll retries |
//! | [`Error::Json`] | Do not retry; the portal changed shape |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//!
//! Authorization failures seen by the GraphQL client are handled inside
//! [`crate::GraphQlClient::execute`] with a single re-authentication; they
//! only surface as [`Error::Api`] when the retry fails as well.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when talking to the charging portal.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity provider rejected the exchange, or it could not complete.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Human-readable description.
        message: String,
        /// Underlying cause, for transport faults.
        #[source]
        source: Option<BoxError>,
    },

    /// GraphQL-level error or malformed response.
    #[error("API error: {message}")]
    Api {
        /// Human-readable description.
        message: String,
        /// Raw error payload from the portal (`Null` when there was none).
        payload: serde_json::Value,
    },

    /// Transport failure, including request timeouts.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an authentication error without an underlying cause.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Create an authentication error wrapping its cause.
    pub fn authentication_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Authentication {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an API error carrying the raw portal payload.
    pub fn api(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Api {
            message: message.into(),
            payload,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error is an authentication failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Result type alias using groendus-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = Error::authentication("NotAuthorizedException: Incorrect username or password.");
        assert_eq!(
            err.to_string(),
            "Authentication failed: NotAuthorizedException: Incorrect username or password."
        );
        assert!(err.is_authentication());

        let err = Error::api("GraphQL error", serde_json::json!(["boom"]));
        assert_eq!(err.to_string(), "API error: GraphQL error");
        assert!(!err.is_authentication());

        let err = Error::invalid_config("page numbers start at 1");
        assert!(err.to_string().contains("page numbers"));
    }

    #[test]
    fn test_authentication_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Error::authentication_with("InitiateAuth request failed", io);
        assert!(err.source().unwrap().to_string().contains("reset by peer"));
    }

    #[test]
    fn test_api_payload_preserved() {
        let payload = serde_json::json!([{"message": "Field 'x' is undefined"}]);
        match Error::api("GraphQL error", payload.clone()) {
            Error::Api { payload: p, .. } => assert_eq!(p, payload),
            other => panic!("unexpected {other:?}"),
        }
    }
}
