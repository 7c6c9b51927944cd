//! Session, user and persisted-record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Seconds before `expirationDate` at which a stored session stops being
/// considered valid, so it is refreshed ahead of real expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// An authenticated session.
///
/// `expires_at` is always populated: when the server omits it, it is derived
/// from `expires_in` at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SessionWire")]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds as reported by the server.
    pub expires_in: i64,
    /// Absolute expiry, epoch seconds.
    pub expires_at: i64,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_refresh_token: Option<String>,
    pub user: User,
}

#[derive(Deserialize)]
struct SessionWire {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    refresh_token: String,
    #[serde(default)]
    provider_token: Option<String>,
    #[serde(default)]
    provider_refresh_token: Option<String>,
    user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl From<SessionWire> for Session {
    fn from(wire: SessionWire) -> Self {
        let expires_at = wire
            .expires_at
            .unwrap_or_else(|| now_secs() + wire.expires_in);
        Self {
            access_token: wire.access_token,
            token_type: wire.token_type,
            expires_in: wire.expires_in,
            expires_at,
            refresh_token: wire.refresh_token,
            provider_token: wire.provider_token,
            provider_refresh_token: wire.provider_refresh_token,
            user: wire.user,
        }
    }
}

impl Session {
    /// Build a bearer session expiring `expires_in` seconds from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
        user: User,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in,
            expires_at: now_secs() + expires_in,
            refresh_token: refresh_token.into(),
            provider_token: None,
            provider_refresh_token: None,
            user,
        }
    }

    /// True once `expires_at` has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= now_secs()
    }
}

/// A user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_metadata: HashMap<String, Value>,
    #[serde(default)]
    pub user_metadata: HashMap<String, Value>,
    #[serde(default)]
    pub identities: Vec<UserIdentity>,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl User {
    /// A user carrying only an id, everything else empty.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            aud: String::new(),
            role: None,
            email: None,
            phone: None,
            email_confirmed_at: None,
            phone_confirmed_at: None,
            confirmed_at: None,
            last_sign_in_at: None,
            created_at: None,
            updated_at: None,
            app_metadata: HashMap::new(),
            user_metadata: HashMap::new(),
            identities: Vec::new(),
            is_anonymous: false,
        }
    }
}

/// An identity linked to a user (email, phone, or an OAuth provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub identity_id: Option<Uuid>,
    pub user_id: Uuid,
    pub provider: String,
    #[serde(default)]
    pub identity_data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Response of endpoints that return a session when the user is confirmed
/// and a bare user otherwise (sign-up, verify).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthResponse {
    Session(Session),
    User(User),
}

impl AuthResponse {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthResponse::Session(session) => Some(session),
            AuthResponse::User(_) => None,
        }
    }

    pub fn user(&self) -> &User {
        match self {
            AuthResponse::Session(session) => &session.user,
            AuthResponse::User(user) => user,
        }
    }
}

/// The persisted record: a session plus the instant it stops being usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredSessionWire")]
pub struct StoredSession {
    pub session: Session,
    /// Epoch seconds.
    #[serde(rename = "expirationDate")]
    pub expiration_date: i64,
}

#[derive(Deserialize)]
struct StoredSessionWire {
    session: Session,
    #[serde(rename = "expirationDate", default)]
    expiration_date: Option<i64>,
}

impl From<StoredSessionWire> for StoredSession {
    fn from(wire: StoredSessionWire) -> Self {
        match wire.expiration_date {
            Some(expiration_date) => Self {
                session: wire.session,
                expiration_date,
            },
            None => Self::new(wire.session),
        }
    }
}

impl StoredSession {
    /// Wrap a session, expiring at its `expires_at`.
    pub fn new(session: Session) -> Self {
        let expiration_date = session.expires_at;
        Self {
            session,
            expiration_date,
        }
    }

    /// Valid while more than [`EXPIRY_MARGIN_SECS`] remain before expiry.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_secs())
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expiration_date > now + EXPIRY_MARGIN_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{session_json, user_json};

    #[test]
    fn test_session_fills_missing_expires_at() {
        let mut json = session_json("access", "refresh", 3600);
        json.as_object_mut().unwrap().remove("expires_at");

        let before = now_secs();
        let session: Session = serde_json::from_value(json).unwrap();
        let after = now_secs();

        assert!(session.expires_at >= before + 3600);
        assert!(session.expires_at <= after + 3600);
        assert_eq!(session.token_type, "bearer");
    }

    #[test]
    fn test_session_keeps_server_expires_at() {
        let mut json = session_json("access", "refresh", 3600);
        json["expires_at"] = serde_json::json!(1_700_000_000);

        let session: Session = serde_json::from_value(json).unwrap();
        assert_eq!(session.expires_at, 1_700_000_000);
    }

    #[test]
    fn test_stored_session_validity_boundary() {
        let session: Session = serde_json::from_value(session_json("a", "r", 3600)).unwrap();
        let stored = StoredSession {
            session,
            expiration_date: 10_000,
        };

        assert!(stored.is_valid_at(10_000 - 61));
        assert!(!stored.is_valid_at(10_000 - 60));
        assert!(!stored.is_valid_at(10_000 - 59));
        assert!(!stored.is_valid_at(10_000 + 5));
    }

    #[test]
    fn test_stored_session_round_trip() {
        let session: Session = serde_json::from_value(session_json("a", "r", 3600)).unwrap();
        let stored = StoredSession::new(session.clone());

        let bytes = serde_json::to_vec(&stored).unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("expirationDate").is_some());
        assert!(raw.get("session").is_some());

        let loaded: StoredSession = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(loaded.session, session);
        assert!((loaded.expiration_date - session.expires_at).abs() <= 1);
    }

    #[test]
    fn test_stored_session_defaults_expiration_date() {
        let json = serde_json::json!({ "session": session_json("a", "r", 120) });
        let stored: StoredSession = serde_json::from_value(json).unwrap();
        assert_eq!(stored.expiration_date, stored.session.expires_at);
    }

    #[test]
    fn test_auth_response_variants() {
        let with_session: AuthResponse =
            serde_json::from_value(session_json("a", "r", 3600)).unwrap();
        assert!(with_session.session().is_some());

        let bare_user: AuthResponse = serde_json::from_value(user_json()).unwrap();
        assert!(bare_user.session().is_none());
        assert_eq!(bare_user.user().email.as_deref(), Some("user@example.com"));
    }
}
