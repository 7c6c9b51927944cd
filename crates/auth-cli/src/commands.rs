//! Subcommand handlers.

use anyhow::{bail, Context};
use auth_config::{Config, Paths};
use auth_engine::{
    AuthChangeEvent, AuthClient, Identity, OAuthOptions, OtpCredentials, OtpType,
    PasswordCredentials, Session, SignOutScope, SignUpCredentials, SsoTarget, UserAttributes,
    VerifyOtpParams,
};
use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Address a user by email or by phone.
#[derive(Args, Debug, Clone, Default)]
pub struct IdentityArgs {
    #[arg(long, conflicts_with = "phone")]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
}

impl IdentityArgs {
    pub fn into_identity(self) -> anyhow::Result<Identity> {
        match (self.email, self.phone) {
            (Some(email), None) => Ok(Identity::Email(email)),
            (None, Some(phone)) => Ok(Identity::Phone(phone)),
            _ => bail!("Pass exactly one of --email or --phone"),
        }
    }
}

/// One-time token kinds accepted by `verify`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyKind {
    Email,
    Sms,
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    PhoneChange,
}

impl From<VerifyKind> for OtpType {
    fn from(kind: VerifyKind) -> Self {
        match kind {
            VerifyKind::Email => OtpType::Email,
            VerifyKind::Sms => OtpType::Sms,
            VerifyKind::Signup => OtpType::Signup,
            VerifyKind::Invite => OtpType::Invite,
            VerifyKind::Magiclink => OtpType::Magiclink,
            VerifyKind::Recovery => OtpType::Recovery,
            VerifyKind::EmailChange => OtpType::EmailChange,
            VerifyKind::PhoneChange => OtpType::PhoneChange,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_data(data: Option<String>) -> anyhow::Result<Option<Value>> {
    data.map(|raw| {
        let value: Value = serde_json::from_str(&raw).context("--data must be valid JSON")?;
        if !value.is_object() {
            bail!("--data must be a JSON object");
        }
        Ok(value)
    })
    .transpose()
}

/// Session summary without the tokens themselves.
fn session_summary(session: &Session) -> Value {
    json!({
        "user_id": session.user.id,
        "email": session.user.email,
        "phone": session.user.phone,
        "token_type": session.token_type,
        "expires_at": session.expires_at,
        "is_anonymous": session.user.is_anonymous,
    })
}

pub fn show_config(config: &Config, paths: &Paths, save: bool) -> anyhow::Result<()> {
    if save {
        config.save(paths).context("Failed to save configuration")?;
        info!(path = %paths.config_file().display(), "Configuration saved");
    }

    let mut redacted = config.clone();
    if !redacted.api_key.is_empty() {
        redacted.api_key = "<redacted>".to_string();
    }
    print_json(&redacted)
}

pub async fn sign_up(
    client: &AuthClient,
    identity: IdentityArgs,
    password: String,
    data: Option<String>,
    redirect_to: Option<String>,
) -> anyhow::Result<()> {
    let mut credentials = SignUpCredentials::new(identity.into_identity()?, password);
    credentials.data = parse_data(data)?;
    credentials.redirect_to = redirect_to;

    let response = client.sign_up(credentials).await?;
    match response.session() {
        Some(session) => print_json(&session_summary(session)),
        None => {
            println!("Confirmation pending for user {}", response.user().id);
            Ok(())
        }
    }
}

pub async fn sign_in(
    client: &AuthClient,
    identity: IdentityArgs,
    password: String,
) -> anyhow::Result<()> {
    let credentials = match identity.into_identity()? {
        Identity::Email(email) => PasswordCredentials::email(email, password),
        Identity::Phone(phone) => PasswordCredentials::phone(phone, password),
    };
    let session = client.sign_in_with_password(credentials).await?;
    print_json(&session_summary(&session))
}

pub async fn sign_in_anonymously(client: &AuthClient) -> anyhow::Result<()> {
    let response = client.sign_in_anonymously(None, None).await?;
    match response.session() {
        Some(session) => print_json(&session_summary(session)),
        None => bail!("Server did not return a session"),
    }
}

pub async fn otp(
    client: &AuthClient,
    identity: IdentityArgs,
    create_user: bool,
    redirect_to: Option<String>,
) -> anyhow::Result<()> {
    let mut credentials = OtpCredentials::new(identity.into_identity()?);
    credentials.should_create_user = create_user;
    credentials.email_redirect_to = redirect_to;

    let response = client.sign_in_with_otp(credentials).await?;
    match response.message_id {
        Some(message_id) => println!("Code sent (message id {})", message_id),
        None => println!("Code sent"),
    }
    Ok(())
}

pub async fn verify(
    client: &AuthClient,
    identity: IdentityArgs,
    token_hash: Option<String>,
    token: String,
    kind: VerifyKind,
) -> anyhow::Result<()> {
    let otp_type = OtpType::from(kind);
    let params = match token_hash {
        Some(token_hash) => VerifyOtpParams::token_hash(token_hash, otp_type),
        None => {
            if token.is_empty() {
                bail!("--token is required unless --token-hash is given");
            }
            match identity.into_identity()? {
                Identity::Email(email) => VerifyOtpParams::email(email, token, otp_type),
                Identity::Phone(phone) => VerifyOtpParams::phone(phone, token, otp_type),
            }
        }
    };

    let response = client.verify_otp(params).await?;
    match response.session() {
        Some(session) => print_json(&session_summary(session)),
        None => print_json(response.user()),
    }
}

pub async fn session(client: &AuthClient) -> anyhow::Result<()> {
    let session = client.session().await?;
    print_json(&session_summary(&session))
}

pub async fn refresh(client: &AuthClient) -> anyhow::Result<()> {
    let session = client.refresh_session(None).await?;
    print_json(&session_summary(&session))
}

pub async fn set_session(
    client: &AuthClient,
    access_token: &str,
    refresh_token: &str,
) -> anyhow::Result<()> {
    let session = client.set_session(access_token, refresh_token).await?;
    print_json(&session_summary(&session))
}

pub async fn user(client: &AuthClient) -> anyhow::Result<()> {
    let user = client.user(None).await?;
    print_json(&user)
}

pub async fn update_user(
    client: &AuthClient,
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
    data: Option<String>,
) -> anyhow::Result<()> {
    let attributes = UserAttributes {
        email,
        phone,
        password,
        nonce: None,
        data: parse_data(data)?,
    };
    let user = client.update_user(attributes, None).await?;
    print_json(&user)
}

pub async fn reset_password(
    client: &AuthClient,
    email: &str,
    redirect_to: Option<&str>,
) -> anyhow::Result<()> {
    client
        .reset_password_for_email(email, redirect_to, None)
        .await?;
    println!("Password reset email sent to {}", email);
    Ok(())
}

pub async fn sign_out(client: &AuthClient, scope: &str) -> anyhow::Result<()> {
    let scope: SignOutScope = scope.parse().map_err(anyhow::Error::msg)?;
    client.sign_out(scope).await?;
    println!("Signed out ({})", scope.as_str());
    Ok(())
}

pub async fn oauth_url(
    client: &AuthClient,
    provider: &str,
    redirect_to: Option<String>,
    scopes: Option<String>,
) -> anyhow::Result<()> {
    let options = OAuthOptions {
        redirect_to,
        scopes,
        query_params: Vec::new(),
    };
    let response = client.get_oauth_sign_in_url(provider, &options).await?;
    println!("{}", response.url);
    Ok(())
}

fn sso_target(domain_or_provider: &str) -> SsoTarget {
    match Uuid::parse_str(domain_or_provider) {
        Ok(id) => SsoTarget::ProviderId(id),
        Err(_) => SsoTarget::Domain(domain_or_provider.to_string()),
    }
}

pub async fn sso(
    client: &AuthClient,
    domain_or_provider: &str,
    redirect_to: Option<&str>,
) -> anyhow::Result<()> {
    let response = client
        .sign_in_with_sso(sso_target(domain_or_provider), redirect_to, None)
        .await?;
    println!("{}", response.url);
    Ok(())
}

pub async fn exchange(client: &AuthClient, code: &str) -> anyhow::Result<()> {
    let session = client.exchange_code_for_session(code).await?;
    print_json(&session_summary(&session))
}

pub async fn from_url(client: &AuthClient, url: &str) -> anyhow::Result<()> {
    let result = client.session_from_url(url).await?;
    if result.redirect_type.as_deref() == Some("recovery") {
        println!("Password recovery session; run `authctl update-user --password` next");
    }
    print_json(&session_summary(&result.session))
}

pub async fn identities(client: &AuthClient) -> anyhow::Result<()> {
    let identities = client.user_identities().await?;
    print_json(&identities)
}

fn event_line(event: AuthChangeEvent, session: Option<&Session>) -> Value {
    json!({
        "event": event,
        "user_id": session.map(|s| s.user.id),
        "expires_at": session.map(|s| s.expires_at),
    })
}

pub async fn watch(client: &AuthClient) -> anyhow::Result<()> {
    let handle = client.on_auth_state_change(|event, session| {
        println!("{}", event_line(event, session.as_ref()));
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.remove();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_args() {
        let email = IdentityArgs {
            email: Some("user@example.com".to_string()),
            phone: None,
        };
        assert_eq!(
            email.into_identity().unwrap(),
            Identity::Email("user@example.com".to_string())
        );

        assert!(IdentityArgs::default().into_identity().is_err());
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(parse_data(None).unwrap(), None);
        assert_eq!(
            parse_data(Some(r#"{"name":"Ada"}"#.to_string())).unwrap(),
            Some(json!({"name": "Ada"}))
        );
        assert!(parse_data(Some("[1,2]".to_string())).is_err());
        assert!(parse_data(Some("not json".to_string())).is_err());
    }

    #[test]
    fn test_sso_target() {
        assert_eq!(
            sso_target("acme.com"),
            SsoTarget::Domain("acme.com".to_string())
        );
        let id = Uuid::new_v4();
        assert_eq!(sso_target(&id.to_string()), SsoTarget::ProviderId(id));
    }

    #[test]
    fn test_verify_kind_maps_to_otp_type() {
        assert_eq!(OtpType::from(VerifyKind::EmailChange), OtpType::EmailChange);
        assert_eq!(OtpType::from(VerifyKind::Sms), OtpType::Sms);
    }

    #[test]
    fn test_event_line() {
        let line = event_line(AuthChangeEvent::SignedOut, None);
        assert_eq!(line["event"], "SIGNED_OUT");
        assert!(line["user_id"].is_null());
    }
}
