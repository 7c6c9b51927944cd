//! Auth client orchestration.
//!
//! Every mutating operation follows the same shape: optionally clear the
//! local session, make one remote call, then persist and publish. Errors
//! propagate and leave local state as the first step left it.

use crate::api::AuthApi;
use crate::auth_fsm::{input_for, ClientMachine, ClientMachineInput, ClientState};
use crate::events::{AuthChangeEvent, EventEmitter, ListenerHandle};
use crate::jwt::decode_claims;
use crate::params::{
    Identity, OAuthOptions, OAuthResponse, OpenIdConnectCredentials, OtpCredentials,
    OtpResponse, PasswordCredentials, ResendParams, SignOutScope, SignUpCredentials,
    SsoResponse, SsoTarget, UrlSession, UserAttributes, VerifyOtpParams, VerifyTarget,
};
use crate::pkce::{CodeVerifierStore, PkceChallenge};
use crate::session::{AuthResponse, Session, User, UserIdentity};
use crate::session_manager::{SessionGeneration, SessionManager, SessionRefresher};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::{ApiError, AuthError, AuthResult};
use async_trait::async_trait;
use auth_config::{AuthFlowType, Config};
use auth_storage::SecureStorage;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use url::Url;

type Body = Map<String, Value>;

fn security(body: &mut Body, captcha_token: Option<&str>) {
    body.insert(
        "gotrue_meta_security".to_string(),
        json!({ "captcha_token": captcha_token }),
    );
}

/// Client for a GoTrue-style auth server.
///
/// Cheap to clone; clones share the session, listeners and state machine.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    api: AuthApi,
    sessions: SessionManager,
    verifiers: CodeVerifierStore,
    events: EventEmitter,
    machine: Mutex<ClientMachine>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("url", &self.inner.api.base_url())
            .field("flow_type", &self.inner.config.flow_type)
            .field("state", &self.state())
            .finish()
    }
}

impl AuthClient {
    /// Create a client talking to the configured server over HTTPS.
    pub fn new(config: Config, storage: Arc<dyn SecureStorage>) -> AuthResult<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::with_transport(config, storage, transport)
    }

    pub fn with_transport(
        config: Config,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn HttpTransport>,
    ) -> AuthResult<Self> {
        config.validate()?;
        let api = AuthApi::new(&config, transport)?;
        let verifiers = CodeVerifierStore::new(storage.clone(), &config.storage_key);
        let storage_key = config.storage_key.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let refresher: Weak<dyn SessionRefresher> = weak.clone();
            ClientInner {
                config,
                api,
                sessions: SessionManager::new(storage, storage_key, refresher),
                verifiers,
                events: EventEmitter::new(),
                machine: Mutex::new(ClientMachine::new()),
            }
        });

        debug!(url = %inner.api.base_url(), "Auth client created");
        Ok(Self { inner })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> ClientState {
        ClientState::from(self.inner.machine.lock().state())
    }

    /// Load the persisted session (refreshing it if needed) and mark the
    /// client authenticated when one exists.
    pub async fn restore_session(&self) -> AuthResult<Option<Session>> {
        match self.inner.sessions.session(true).await {
            Ok(session) => {
                self.inner.transition(&ClientMachineInput::SessionRestored);
                info!(user_id = %session.user.id, "Restored session");
                Ok(Some(session))
            }
            Err(AuthError::SessionNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Register a listener. It first receives `INITIAL_SESSION` with the
    /// current (validated) session, then every later event in order.
    pub fn on_auth_state_change<L>(&self, listener: L) -> ListenerHandle
    where
        L: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
    {
        let sessions = self.inner.sessions.clone();
        self.inner
            .events
            .subscribe(listener, async move { sessions.session(true).await.ok() })
    }

    /// Create a user. Returns a session when no confirmation is required.
    pub async fn sign_up(&self, credentials: SignUpCredentials) -> AuthResult<AuthResponse> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        credentials.identity.write_into(&mut body);
        body.insert("password".to_string(), Value::String(credentials.password));
        body.insert(
            "data".to_string(),
            credentials.data.unwrap_or_else(|| json!({})),
        );
        security(&mut body, credentials.captcha_token.as_deref());

        let redirect_to = match &credentials.identity {
            Identity::Email(_) => {
                self.inner.add_pkce_fields(&mut body).await?;
                credentials.redirect_to.as_deref()
            }
            Identity::Phone(_) => {
                body.insert(
                    "channel".to_string(),
                    Value::String(credentials.channel.as_str().to_string()),
                );
                None
            }
        };

        let response = self
            .inner
            .api
            .sign_up(&Value::Object(body), redirect_to)
            .await?;
        match response.session() {
            Some(session) => {
                info!(user_id = %session.user.id, "Signed up");
                self.inner
                    .save_and_publish(AuthChangeEvent::SignedIn, session.clone())
                    .await?;
            }
            None => info!(user_id = %response.user().id, "Signed up, confirmation pending"),
        }
        Ok(response)
    }

    pub async fn sign_in_with_password(&self, credentials: PasswordCredentials) -> AuthResult<Session> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        credentials.identity.write_into(&mut body);
        body.insert("password".to_string(), Value::String(credentials.password));
        security(&mut body, credentials.captcha_token.as_deref());

        let session = self
            .inner
            .api
            .token("password", &Value::Object(body))
            .await?;
        self.inner.signed_in(session).await
    }

    /// Sign in with an ID token from an external OpenID Connect provider.
    pub async fn sign_in_with_id_token(
        &self,
        credentials: OpenIdConnectCredentials,
    ) -> AuthResult<Session> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        body.insert("provider".to_string(), Value::String(credentials.provider));
        body.insert("id_token".to_string(), Value::String(credentials.id_token));
        if let Some(access_token) = credentials.access_token {
            body.insert("access_token".to_string(), Value::String(access_token));
        }
        if let Some(nonce) = credentials.nonce {
            body.insert("nonce".to_string(), Value::String(nonce));
        }
        security(&mut body, credentials.captcha_token.as_deref());

        let session = self
            .inner
            .api
            .token("id_token", &Value::Object(body))
            .await?;
        self.inner.signed_in(session).await
    }

    pub async fn sign_in_anonymously(
        &self,
        data: Option<Value>,
        captcha_token: Option<&str>,
    ) -> AuthResult<AuthResponse> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        body.insert("data".to_string(), data.unwrap_or_else(|| json!({})));
        security(&mut body, captcha_token);

        let response = self.inner.api.sign_up(&Value::Object(body), None).await?;
        if let Some(session) = response.session() {
            info!(user_id = %session.user.id, "Signed in anonymously");
            self.inner
                .save_and_publish(AuthChangeEvent::SignedIn, session.clone())
                .await?;
        }
        Ok(response)
    }

    /// Send a magic link or one-time code. No session is created until the
    /// code is verified.
    pub async fn sign_in_with_otp(&self, credentials: OtpCredentials) -> AuthResult<OtpResponse> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        credentials.identity.write_into(&mut body);
        body.insert(
            "data".to_string(),
            credentials.data.unwrap_or_else(|| json!({})),
        );
        body.insert(
            "create_user".to_string(),
            Value::Bool(credentials.should_create_user),
        );
        security(&mut body, credentials.captcha_token.as_deref());

        let redirect_to = match &credentials.identity {
            Identity::Email(_) => {
                self.inner.add_pkce_fields(&mut body).await?;
                credentials.email_redirect_to.as_deref()
            }
            Identity::Phone(_) => {
                body.insert(
                    "channel".to_string(),
                    Value::String(credentials.channel.as_str().to_string()),
                );
                None
            }
        };

        let response = self.inner.api.otp(&Value::Object(body), redirect_to).await?;
        debug!("One-time password sent");
        Ok(response)
    }

    /// Start enterprise SSO. Returns the identity provider URL to visit.
    pub async fn sign_in_with_sso(
        &self,
        target: SsoTarget,
        redirect_to: Option<&str>,
        captcha_token: Option<&str>,
    ) -> AuthResult<SsoResponse> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        match target {
            SsoTarget::Domain(domain) => body.insert("domain".to_string(), Value::String(domain)),
            SsoTarget::ProviderId(id) => {
                body.insert("provider_id".to_string(), Value::String(id.to_string()))
            }
        };
        if let Some(redirect_to) = redirect_to {
            body.insert("redirect_to".to_string(), Value::String(redirect_to.to_string()));
        }
        body.insert("skip_http_redirect".to_string(), Value::Bool(true));
        security(&mut body, captcha_token);
        self.inner.add_pkce_fields(&mut body).await?;

        self.inner.api.sso(&Value::Object(body)).await
    }

    /// URL that starts a redirect-based sign-in with `provider`. Under the
    /// PKCE flow a new verifier is stored for the later exchange.
    pub async fn get_oauth_sign_in_url(
        &self,
        provider: &str,
        options: &OAuthOptions,
    ) -> AuthResult<OAuthResponse> {
        let pkce = self.inner.pkce_challenge().await?;
        let url = self.inner.api.authorize_url(provider, options, pkce.as_ref())?;
        Ok(OAuthResponse {
            provider: provider.to_string(),
            url: url.to_string(),
        })
    }

    pub async fn verify_otp(&self, params: VerifyOtpParams) -> AuthResult<AuthResponse> {
        self.inner.clear_session().await?;

        let mut body = Body::new();
        match params.target {
            VerifyTarget::Email(email) => {
                body.insert("email".to_string(), Value::String(email));
                body.insert("token".to_string(), Value::String(params.token));
            }
            VerifyTarget::Phone(phone) => {
                body.insert("phone".to_string(), Value::String(phone));
                body.insert("token".to_string(), Value::String(params.token));
            }
            VerifyTarget::TokenHash(token_hash) => {
                body.insert("token_hash".to_string(), Value::String(token_hash));
            }
        }
        body.insert("type".to_string(), serde_json::to_value(params.otp_type)?);
        security(&mut body, params.captcha_token.as_deref());

        let response = self
            .inner
            .api
            .verify(&Value::Object(body), params.redirect_to.as_deref())
            .await?;
        if let Some(session) = response.session() {
            info!(user_id = %session.user.id, "Verified one-time password");
            self.inner
                .save_and_publish(AuthChangeEvent::SignedIn, session.clone())
                .await?;
        }
        Ok(response)
    }

    /// Exchange a PKCE authorization code using the stored verifier.
    pub async fn exchange_code_for_session(&self, auth_code: &str) -> AuthResult<Session> {
        let code_verifier = self.inner.verifiers.require().await?;

        let session = self
            .inner
            .api
            .token(
                "pkce",
                &json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
            )
            .await?;
        self.inner.verifiers.clear().await?;
        self.inner.signed_in(session).await
    }

    /// Complete a redirect-based flow from the URL the browser landed on.
    ///
    /// PKCE callbacks carry `?code=`; implicit callbacks carry tokens in the
    /// fragment. A `type=recovery` callback also publishes
    /// `PASSWORD_RECOVERY`.
    pub async fn session_from_url(&self, url: &str) -> AuthResult<UrlSession> {
        let url = Url::parse(url)?;
        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }

        if let Some(description) = params.get("error_description") {
            return Err(ApiError {
                message: description.clone(),
                code: params
                    .get("error_code")
                    .or_else(|| params.get("error"))
                    .cloned(),
                hint: None,
                detail: None,
                status: 400,
            }
            .into());
        }

        let redirect_type = params.get("type").cloned();
        let session = match self.inner.config.flow_type {
            AuthFlowType::Pkce => {
                let code = params.get("code").ok_or(AuthError::InvalidPkceFlowUrl)?;
                self.exchange_code_for_session(code).await?
            }
            AuthFlowType::Implicit => self.implicit_session(&params).await?,
        };

        if redirect_type.as_deref() == Some("recovery") {
            self.inner
                .publish(AuthChangeEvent::PasswordRecovery, Some(session.clone()));
        }
        Ok(UrlSession {
            session,
            redirect_type,
        })
    }

    async fn implicit_session(&self, params: &HashMap<String, String>) -> AuthResult<Session> {
        let field = |name: &str| {
            params
                .get(name)
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::InvalidImplicitGrantFlowUrl)
        };
        let access_token = field("access_token")?;
        let refresh_token = field("refresh_token")?;
        let token_type = field("token_type")?;
        let expires_in: i64 = field("expires_in")?
            .parse()
            .map_err(|_| AuthError::InvalidImplicitGrantFlowUrl)?;

        let user = self.inner.api.user(access_token).await?;

        let mut session = Session::new(access_token.as_str(), refresh_token.as_str(), expires_in, user);
        session.token_type = token_type.clone();
        if let Some(expires_at) = params.get("expires_at").and_then(|v| v.parse().ok()) {
            session.expires_at = expires_at;
        }
        session.provider_token = params.get("provider_token").cloned();
        session.provider_refresh_token = params.get("provider_refresh_token").cloned();

        self.inner.signed_in(session).await
    }

    /// Adopt tokens obtained elsewhere.
    ///
    /// An expired access token goes straight to the refresh path. Otherwise
    /// the session is built from the token's claims without a network call.
    pub async fn set_session(&self, access_token: &str, refresh_token: &str) -> AuthResult<Session> {
        let claims = decode_claims(access_token)?;
        let expires_at = claims.expires_at()?;
        let now = Utc::now().timestamp();

        if expires_at <= now {
            debug!(expires_at, "Access token already expired, refreshing");
            return self.inner.sessions.refresh(refresh_token).await;
        }

        let user = claims.to_user()?;
        let mut session = Session::new(access_token, refresh_token, expires_at - now, user);
        session.expires_at = expires_at;
        self.inner.signed_in(session).await
    }

    /// Refresh with `refresh_token`, or with the stored session's token.
    pub async fn refresh_session(&self, refresh_token: Option<&str>) -> AuthResult<Session> {
        let refresh_token = match refresh_token {
            Some(token) => token.to_string(),
            None => self.inner.sessions.session(false).await?.refresh_token,
        };
        self.inner.sessions.refresh(&refresh_token).await
    }

    /// The current session, refreshed first when it is about to expire.
    pub async fn session(&self) -> AuthResult<Session> {
        self.inner.sessions.session(true).await
    }

    /// Fetch the user behind `jwt`, or behind the current session.
    pub async fn user(&self, jwt: Option<&str>) -> AuthResult<User> {
        match jwt {
            Some(jwt) => self.inner.api.user(jwt).await,
            None => {
                let session = self.session().await?;
                self.inner.api.user(&session.access_token).await
            }
        }
    }

    pub async fn update_user(
        &self,
        attributes: UserAttributes,
        redirect_to: Option<&str>,
    ) -> AuthResult<User> {
        let mut session = self.session().await?;

        let changes_email = attributes.email.is_some();
        let Value::Object(mut body) = serde_json::to_value(&attributes)? else {
            return Err(AuthError::Internal("user attributes are not an object".to_string()));
        };
        if changes_email {
            self.inner.add_pkce_fields(&mut body).await?;
        }

        let user = self
            .inner
            .api
            .update_user(&session.access_token, &Value::Object(body), redirect_to)
            .await?;
        session.user = user.clone();

        info!(user_id = %user.id, "Updated user");
        self.inner
            .save_and_publish(AuthChangeEvent::UserUpdated, session)
            .await?;
        Ok(user)
    }

    /// Revoke sessions on the server and, unless `scope` is
    /// [`SignOutScope::Others`], clear the local one.
    ///
    /// A server that no longer knows the session (401/404) does not stop the
    /// local sign-out.
    pub async fn sign_out(&self, scope: SignOutScope) -> AuthResult<()> {
        let session = match self.inner.sessions.session(false).await {
            Ok(session) => session,
            Err(AuthError::SessionNotFound) => {
                warn!("Sign out requested without a session");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.inner.api.logout(&session.access_token, scope).await {
            Ok(()) => {}
            Err(e) if e.is_session_missing() => {
                warn!(error = %e, "Session already gone on the server");
            }
            Err(e) => return Err(e),
        }

        if scope != SignOutScope::Others {
            self.inner.sessions.remove().await?;
            self.inner.verifiers.clear().await?;
            info!(user_id = %session.user.id, scope = scope.as_str(), "Signed out");
            self.inner.publish(AuthChangeEvent::SignedOut, None);
        }
        Ok(())
    }

    /// Re-send a signup confirmation or a change confirmation.
    pub async fn resend(&self, params: ResendParams) -> AuthResult<OtpResponse> {
        let mut body = Body::new();
        params.identity.write_into(&mut body);
        body.insert("type".to_string(), serde_json::to_value(params.otp_type)?);
        security(&mut body, params.captcha_token.as_deref());

        let redirect_to = match params.identity {
            Identity::Email(_) => params.email_redirect_to.as_deref(),
            Identity::Phone(_) => None,
        };
        self.inner.api.resend(&Value::Object(body), redirect_to).await
    }

    /// Send a reauthentication nonce for the current user.
    pub async fn reauthenticate(&self) -> AuthResult<()> {
        let session = self.session().await?;
        self.inner.api.reauthenticate(&session.access_token).await
    }

    pub async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
        captcha_token: Option<&str>,
    ) -> AuthResult<()> {
        let mut body = Body::new();
        body.insert("email".to_string(), Value::String(email.to_string()));
        security(&mut body, captcha_token);
        self.inner.add_pkce_fields(&mut body).await?;

        self.inner.api.recover(&Value::Object(body), redirect_to).await
    }

    pub async fn user_identities(&self) -> AuthResult<Vec<UserIdentity>> {
        Ok(self.user(None).await?.identities)
    }

    /// URL that links another provider identity to the current user.
    pub async fn link_identity_url(
        &self,
        provider: &str,
        options: &OAuthOptions,
    ) -> AuthResult<OAuthResponse> {
        let session = self.session().await?;
        let pkce = self.inner.pkce_challenge().await?;
        let url = self
            .inner
            .api
            .link_identity(&session.access_token, provider, options, pkce.as_ref())
            .await?;
        Ok(OAuthResponse {
            provider: provider.to_string(),
            url,
        })
    }

    pub async fn unlink_identity(&self, identity: &UserIdentity) -> AuthResult<()> {
        let session = self.session().await?;
        let identity_id = identity
            .identity_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| identity.id.clone());
        self.inner
            .api
            .unlink_identity(&session.access_token, &identity_id)
            .await
    }
}

impl ClientInner {
    fn transition(&self, input: &ClientMachineInput) {
        let mut machine = self.machine.lock();
        let old_state = ClientState::from(machine.state());
        if machine.consume(input).is_err() {
            debug!(input = ?input, state = ?old_state, "Ignored client state input");
            return;
        }
        let new_state = ClientState::from(machine.state());
        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Client state transition");
        }
    }

    /// Drop the local session without an event, as sign-in flows do first.
    async fn clear_session(&self) -> AuthResult<()> {
        self.sessions.remove().await?;
        self.transition(&ClientMachineInput::SessionCleared);
        Ok(())
    }

    /// Drive the state machine and notify listeners.
    fn publish(&self, event: AuthChangeEvent, session: Option<Session>) {
        if let Some(input) = input_for(event) {
            self.transition(&input);
        }
        self.events.emit(event, session);
    }

    /// Persist, then publish. Nothing is published if persisting fails.
    async fn save_and_publish(&self, event: AuthChangeEvent, session: Session) -> AuthResult<()> {
        self.sessions.update(session.clone()).await?;
        self.publish(event, Some(session));
        Ok(())
    }

    async fn signed_in(&self, session: Session) -> AuthResult<Session> {
        info!(user_id = %session.user.id, "Signed in");
        self.save_and_publish(AuthChangeEvent::SignedIn, session.clone())
            .await?;
        Ok(session)
    }

    async fn pkce_challenge(&self) -> AuthResult<Option<PkceChallenge>> {
        match self.config.flow_type {
            AuthFlowType::Pkce => Ok(Some(
                self.verifiers.begin(self.config.code_challenge_method).await?,
            )),
            AuthFlowType::Implicit => Ok(None),
        }
    }

    async fn add_pkce_fields(&self, body: &mut Body) -> AuthResult<()> {
        if let Some(pkce) = self.pkce_challenge().await? {
            body.insert("code_challenge".to_string(), Value::String(pkce.challenge));
            body.insert(
                "code_challenge_method".to_string(),
                Value::String(pkce.method.as_str().to_string()),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRefresher for ClientInner {
    async fn refresh_session(
        &self,
        refresh_token: &str,
        generation: SessionGeneration,
    ) -> AuthResult<Session> {
        match self.api.refresh_token(refresh_token).await {
            Ok(session) => {
                if !self.sessions.update_if_current(generation, session.clone()).await? {
                    info!(
                        user_id = %session.user.id,
                        "Discarding refreshed session, local session changed meanwhile"
                    );
                    return Err(AuthError::SessionSuperseded);
                }
                info!(
                    user_id = %session.user.id,
                    expires_at = session.expires_at,
                    "Session refreshed"
                );
                self.publish(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e) if e.is_refresh_token_rejected() => {
                warn!(error = %e, "Refresh token rejected, signing out");
                match self.sessions.remove_if_current(generation).await {
                    Ok(true) => self.publish(AuthChangeEvent::SignedOut, None),
                    Ok(false) => {
                        debug!("Local session changed during refresh, not signing out");
                    }
                    Err(remove_err) => {
                        warn!(error = %remove_err, "Failed to clear rejected session");
                        self.publish(AuthChangeEvent::SignedOut, None);
                    }
                }
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Session refresh failed");
                Err(e)
            }
        }
    }
}
