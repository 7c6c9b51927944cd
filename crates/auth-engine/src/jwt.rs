//! Unsigned JWT claim decoding.
//!
//! Tokens are never verified here; the claims are only read to learn the
//! expiry and the user snapshot embedded by the server.

use crate::session::User;
use crate::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Claims the auth server puts into its access tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    /// A string or an array of strings.
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub app_metadata: HashMap<String, Value>,
    #[serde(default)]
    pub user_metadata: HashMap<String, Value>,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Decode the payload segment of a compact JWT.
pub fn decode_claims(token: &str) -> AuthResult<JwtClaims> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(AuthError::MalformedJwt(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedJwt(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedJwt(format!("payload is not a JSON object: {}", e)))
}

impl JwtClaims {
    /// Absolute expiry in epoch seconds.
    pub fn expires_at(&self) -> AuthResult<i64> {
        self.exp.ok_or(AuthError::MissingExpClaim)
    }

    /// Build a user snapshot from the claims.
    pub fn to_user(&self) -> AuthResult<User> {
        let sub = self
            .sub
            .as_deref()
            .ok_or_else(|| AuthError::MalformedJwt("missing sub claim".to_string()))?;
        let id = Uuid::parse_str(sub)
            .map_err(|e| AuthError::MalformedJwt(format!("sub is not a UUID: {}", e)))?;

        let aud = match &self.aud {
            Some(Value::String(aud)) => aud.clone(),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .next()
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let mut user = User::with_id(id);
        user.aud = aud;
        user.role = self.role.clone();
        user.email = self.email.clone().filter(|e| !e.is_empty());
        user.phone = self.phone.clone().filter(|p| !p.is_empty());
        user.app_metadata = self.app_metadata.clone();
        user.user_metadata = self.user_metadata.clone();
        user.is_anonymous = self.is_anonymous;
        Ok(user)
    }
}
