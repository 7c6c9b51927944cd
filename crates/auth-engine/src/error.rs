//! Authentication error types.

use auth_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Structured rejection returned by the auth server.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (HTTP {status})")]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// HTTP status of the response that carried the error.
    pub status: u16,
}

/// Authentication error type.
///
/// Cloneable so a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// No local credentials
    #[error("Session not found")]
    SessionNotFound,

    /// PKCE exchange attempted without a pending verifier
    #[error("PKCE code verifier not found in storage")]
    CodeVerifierNotFound,

    /// Redirect URL is not a PKCE callback
    #[error("Not a valid PKCE flow URL")]
    InvalidPkceFlowUrl,

    /// Redirect URL is not an implicit grant callback
    #[error("Not a valid implicit grant flow URL")]
    InvalidImplicitGrantFlowUrl,

    /// Access token has no `exp` claim
    #[error("JWT is missing the exp claim")]
    MissingExpClaim,

    /// Access token could not be decoded
    #[error("Malformed JWT: {0}")]
    MalformedJwt(String),

    /// Structured remote rejection
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Unstructured remote failure
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// Persistence I/O failure
    #[error("Storage error: {0}")]
    Storage(Arc<StorageError>),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session was signed out or replaced while a refresh ran
    #[error("Session changed while it was being refreshed")]
    SessionSuperseded,

    /// The client owning the session was dropped mid-operation
    #[error("Auth client was dropped")]
    ClientDropped,

    /// A background task failed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(Arc::new(err))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Json(Arc::new(err))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl From<auth_config::ConfigError> for AuthError {
    fn from(err: auth_config::ConfigError) -> Self {
        AuthError::Config(err.to_string())
    }
}

impl AuthError {
    /// HTTP status of a remote failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Api(e) => Some(e.status),
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server says the session is already gone (401 or 404).
    pub fn is_session_missing(&self) -> bool {
        matches!(self.status(), Some(401 | 404))
    }

    /// True when the server refused a refresh token outright: a structured
    /// 4xx error other than rate limiting. Network failures and 5xx
    /// responses are not rejections.
    pub fn is_refresh_token_rejected(&self) -> bool {
        match self {
            AuthError::Api(e) => (400..500).contains(&e.status) && e.status != 429,
            _ => false,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            _ => matches!(self.status(), Some(500..=599)),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
