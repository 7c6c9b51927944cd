//! Request parameter types for the client operations.

use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// How a user is addressed: by email or by phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Phone(String),
}

impl Identity {
    pub(crate) fn write_into(&self, body: &mut serde_json::Map<String, Value>) {
        match self {
            Identity::Email(email) => body.insert("email".into(), Value::String(email.clone())),
            Identity::Phone(phone) => body.insert("phone".into(), Value::String(phone.clone())),
        };
    }
}

/// Email/phone and password credentials.
#[derive(Debug, Clone)]
pub struct PasswordCredentials {
    pub identity: Identity,
    pub password: String,
    pub captcha_token: Option<String>,
}

impl PasswordCredentials {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: Identity::Email(email.into()),
            password: password.into(),
            captcha_token: None,
        }
    }

    pub fn phone(phone: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: Identity::Phone(phone.into()),
            password: password.into(),
            captcha_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SmsChannel {
    #[default]
    Sms,
    Whatsapp,
}

impl SmsChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsChannel::Sms => "sms",
            SmsChannel::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpCredentials {
    pub identity: Identity,
    pub password: String,
    /// Stored as the new user's `user_metadata`.
    pub data: Option<Value>,
    /// Where the confirmation link lands (email sign-ups).
    pub redirect_to: Option<String>,
    pub captcha_token: Option<String>,
    /// Delivery channel for phone confirmations.
    pub channel: SmsChannel,
}

impl SignUpCredentials {
    pub fn new(identity: Identity, password: impl Into<String>) -> Self {
        Self {
            identity,
            password: password.into(),
            data: None,
            redirect_to: None,
            captcha_token: None,
            channel: SmsChannel::default(),
        }
    }
}

/// Passwordless sign-in by magic link or one-time code.
#[derive(Debug, Clone)]
pub struct OtpCredentials {
    pub identity: Identity,
    /// Create the user if it does not exist yet.
    pub should_create_user: bool,
    pub data: Option<Value>,
    pub email_redirect_to: Option<String>,
    pub captcha_token: Option<String>,
    pub channel: SmsChannel,
}

impl OtpCredentials {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            should_create_user: true,
            data: None,
            email_redirect_to: None,
            captcha_token: None,
            channel: SmsChannel::default(),
        }
    }
}

/// Kind of one-time token being verified or resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    Sms,
    PhoneChange,
    Email,
}

/// What the one-time token is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyTarget {
    Email(String),
    Phone(String),
    /// Hashed token from an email link; no address needed.
    TokenHash(String),
}

#[derive(Debug, Clone)]
pub struct VerifyOtpParams {
    pub target: VerifyTarget,
    /// The code the user typed. Ignored for `TokenHash`.
    pub token: String,
    pub otp_type: OtpType,
    pub redirect_to: Option<String>,
    pub captcha_token: Option<String>,
}

impl VerifyOtpParams {
    pub fn email(email: impl Into<String>, token: impl Into<String>, otp_type: OtpType) -> Self {
        Self {
            target: VerifyTarget::Email(email.into()),
            token: token.into(),
            otp_type,
            redirect_to: None,
            captcha_token: None,
        }
    }

    pub fn phone(phone: impl Into<String>, token: impl Into<String>, otp_type: OtpType) -> Self {
        Self {
            target: VerifyTarget::Phone(phone.into()),
            token: token.into(),
            otp_type,
            redirect_to: None,
            captcha_token: None,
        }
    }

    pub fn token_hash(token_hash: impl Into<String>, otp_type: OtpType) -> Self {
        Self {
            target: VerifyTarget::TokenHash(token_hash.into()),
            token: String::new(),
            otp_type,
            redirect_to: None,
            captcha_token: None,
        }
    }
}

/// Re-send a confirmation or change message.
#[derive(Debug, Clone)]
pub struct ResendParams {
    pub identity: Identity,
    /// One of `Signup`, `EmailChange`, `Sms`, `PhoneChange`.
    pub otp_type: OtpType,
    pub email_redirect_to: Option<String>,
    pub captcha_token: Option<String>,
}

/// Sign in with an ID token issued by an external OpenID Connect provider.
#[derive(Debug, Clone)]
pub struct OpenIdConnectCredentials {
    pub provider: String,
    pub id_token: String,
    pub access_token: Option<String>,
    pub nonce: Option<String>,
    pub captcha_token: Option<String>,
}

impl OpenIdConnectCredentials {
    pub fn new(provider: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id_token: id_token.into(),
            access_token: None,
            nonce: None,
            captcha_token: None,
        }
    }
}

/// Enterprise SSO lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoTarget {
    Domain(String),
    ProviderId(Uuid),
}

/// Options for redirect-based provider sign-in.
#[derive(Debug, Clone, Default)]
pub struct OAuthOptions {
    pub redirect_to: Option<String>,
    /// Space-separated provider scopes.
    pub scopes: Option<String>,
    pub query_params: Vec<(String, String)>,
}

/// Fields changed by `update_user`. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Reauthentication code, required by some servers to change the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Which sessions a sign-out revokes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignOutScope {
    /// Every session of the user.
    #[default]
    Global,
    /// Only this session.
    Local,
    /// Every session except this one; local state is kept.
    Others,
}

impl SignOutScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SignOutScope::Global => "global",
            SignOutScope::Local => "local",
            SignOutScope::Others => "others",
        }
    }
}

impl std::str::FromStr for SignOutScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(SignOutScope::Global),
            "local" => Ok(SignOutScope::Local),
            "others" => Ok(SignOutScope::Others),
            other => Err(format!("unknown sign-out scope: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SsoResponse {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthResponse {
    pub provider: String,
    pub url: String,
}

/// Response of `sign_in_with_otp` and `resend`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OtpResponse {
    /// Present for phone OTPs.
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Outcome of parsing a redirect URL.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlSession {
    pub session: Session,
    /// `type` parameter of the redirect, e.g. `recovery`.
    pub redirect_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_type_wire_names() {
        assert_eq!(serde_json::to_value(OtpType::EmailChange).unwrap(), "email_change");
        assert_eq!(serde_json::to_value(OtpType::Magiclink).unwrap(), "magiclink");
        assert_eq!(serde_json::to_value(OtpType::PhoneChange).unwrap(), "phone_change");
    }

    #[test]
    fn test_sign_out_scope_parse() {
        assert_eq!("others".parse::<SignOutScope>().unwrap(), SignOutScope::Others);
        assert_eq!(SignOutScope::default().as_str(), "global");
        assert!("everyone".parse::<SignOutScope>().is_err());
    }

    #[test]
    fn test_user_attributes_skip_unset() {
        let attrs = UserAttributes {
            data: Some(serde_json::json!({"name": "Ada"})),
            ..Default::default()
        };
        let value = serde_json::to_value(&attrs).unwrap();
        assert_eq!(value, serde_json::json!({"data": {"name": "Ada"}}));
    }

    #[test]
    fn test_otp_credentials_default_to_creating_users() {
        let creds = OtpCredentials::new(Identity::Email("a@b.c".into()));
        assert!(creds.should_create_user);
    }
}
