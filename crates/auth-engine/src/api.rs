//! Wire layer for the auth server's REST endpoints.
//!
//! Builds requests (endpoint, headers, JSON bodies), hands them to the
//! transport and decodes success payloads or structured errors. Holds no
//! session state.

use crate::params::{OAuthOptions, OtpResponse, SignOutScope, SsoResponse};
use crate::pkce::PkceChallenge;
use crate::session::{AuthResponse, Session, User};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::{ApiError, AuthError, AuthResult};
use auth_config::Config;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Sent as `X-Client-Info` with every request.
pub const CLIENT_INFO: &str = concat!("auth-engine/", env!("CARGO_PKG_VERSION"));

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Turn a non-2xx response into an error.
///
/// A JSON body carrying a message becomes [`AuthError::Api`]; anything else
/// is [`AuthError::Http`].
pub fn decode_error(response: &HttpResponse) -> AuthError {
    let text = response.text();
    let parsed: Option<serde_json::Map<String, Value>> = serde_json::from_str(&text).ok();

    let Some(fields) = parsed else {
        return AuthError::Http {
            status: response.status,
            body: text,
        };
    };

    let string_field = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_string);

    let message = ["msg", "message", "error_description", "error"]
        .into_iter()
        .find_map(string_field);
    let Some(message) = message else {
        return AuthError::Http {
            status: response.status,
            body: text,
        };
    };

    let code = ["error_code", "code", "error"]
        .into_iter()
        .filter_map(string_field)
        .find(|code| *code != message);

    AuthError::Api(ApiError {
        message,
        code,
        hint: string_field("hint"),
        detail: string_field("details").or_else(|| string_field("detail")),
        status: response.status,
    })
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

/// Client for the auth server REST API.
#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: String,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AuthApi {
    pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> AuthResult<Self> {
        let base_url = config.url()?.as_str().trim_end_matches('/').to_string();
        Ok(Self {
            transport,
            base_url,
            api_key: config.api_key.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> AuthResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        jwt: Option<&str>,
    ) -> AuthResult<HttpRequest> {
        let url = self.endpoint(path, query)?;
        let bearer = jwt.unwrap_or(&self.api_key);

        let mut request = HttpRequest::new(method, url)
            .header("apikey", self.api_key.as_str())
            .header("Authorization", format!("Bearer {}", bearer))
            .header("X-Client-Info", CLIENT_INFO);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request)
    }

    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let method = request.method.clone();
        let path = request.url.path().to_string();
        debug!(method = %method, path = %path, "Auth request");

        let response = self.transport.execute(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let body_summary = summarize_response_body(&response.text());
        warn!(
            method = %method,
            path = %path,
            status = response.status,
            body_summary = %body_summary,
            "Auth request failed"
        );
        Err(decode_error(&response))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> AuthResult<T> {
        self.send(request).await?.json()
    }

    /// `POST /signup`. Returns a session when the user needs no confirmation.
    pub async fn sign_up(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<AuthResponse> {
        let query = redirect_query(redirect_to);
        let request = self
            .request(Method::POST, "/signup", &query, None)?
            .json(body)?;
        self.send_json(request).await
    }

    /// `POST /token?grant_type=<grant_type>`.
    pub async fn token(&self, grant_type: &str, body: &Value) -> AuthResult<Session> {
        let request = self
            .request(Method::POST, "/token", &[("grant_type", grant_type)], None)?
            .json(body)?;
        self.send_json(request).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<Session> {
        self.token("refresh_token", &json!({ "refresh_token": refresh_token }))
            .await
    }

    /// `POST /otp`.
    pub async fn otp(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<OtpResponse> {
        let query = redirect_query(redirect_to);
        let request = self.request(Method::POST, "/otp", &query, None)?.json(body)?;
        let response = self.send(request).await?;
        response.json_or_default()
    }

    /// `POST /sso`.
    pub async fn sso(&self, body: &Value) -> AuthResult<SsoResponse> {
        let request = self.request(Method::POST, "/sso", &[], None)?.json(body)?;
        self.send_json(request).await
    }

    /// `POST /verify`.
    pub async fn verify(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<AuthResponse> {
        let query = redirect_query(redirect_to);
        let request = self
            .request(Method::POST, "/verify", &query, None)?
            .json(body)?;
        self.send_json(request).await
    }

    /// `POST /resend`.
    pub async fn resend(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<OtpResponse> {
        let query = redirect_query(redirect_to);
        let request = self
            .request(Method::POST, "/resend", &query, None)?
            .json(body)?;
        let response = self.send(request).await?;
        response.json_or_default()
    }

    /// `POST /recover`.
    pub async fn recover(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<()> {
        let query = redirect_query(redirect_to);
        let request = self
            .request(Method::POST, "/recover", &query, None)?
            .json(body)?;
        self.send(request).await?;
        Ok(())
    }

    /// `POST /logout?scope=<scope>`.
    pub async fn logout(&self, jwt: &str, scope: SignOutScope) -> AuthResult<()> {
        let request = self.request(
            Method::POST,
            "/logout",
            &[("scope", scope.as_str())],
            Some(jwt),
        )?;
        self.send(request).await?;
        Ok(())
    }

    /// `GET /user`.
    pub async fn user(&self, jwt: &str) -> AuthResult<User> {
        let request = self.request(Method::GET, "/user", &[], Some(jwt))?;
        self.send_json(request).await
    }

    /// `PUT /user`.
    pub async fn update_user(
        &self,
        jwt: &str,
        body: &Value,
        redirect_to: Option<&str>,
    ) -> AuthResult<User> {
        let query = redirect_query(redirect_to);
        let request = self
            .request(Method::PUT, "/user", &query, Some(jwt))?
            .json(body)?;
        self.send_json(request).await
    }

    /// `GET /reauthenticate`. Sends a nonce to the user's email or phone.
    pub async fn reauthenticate(&self, jwt: &str) -> AuthResult<()> {
        let request = self.request(Method::GET, "/reauthenticate", &[], Some(jwt))?;
        self.send(request).await?;
        Ok(())
    }

    /// `GET /user/identities/authorize`. Returns the provider URL to visit.
    pub async fn link_identity(
        &self,
        jwt: &str,
        provider: &str,
        options: &OAuthOptions,
        pkce: Option<&PkceChallenge>,
    ) -> AuthResult<String> {
        let mut query = authorize_query(provider, options, pkce);
        query.push(("skip_http_redirect".to_string(), "true".to_string()));
        let pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let request = self.request(Method::GET, "/user/identities/authorize", &pairs, Some(jwt))?;
        let response: UrlResponse = self.send_json(request).await?;
        Ok(response.url)
    }

    /// `DELETE /user/identities/<id>`.
    pub async fn unlink_identity(&self, jwt: &str, identity_id: &str) -> AuthResult<()> {
        let path = format!("/user/identities/{}", identity_id);
        let request = self.request(Method::DELETE, &path, &[], Some(jwt))?;
        self.send(request).await?;
        Ok(())
    }

    /// The `/authorize` URL for redirect-based provider sign-in. No request is made.
    pub fn authorize_url(
        &self,
        provider: &str,
        options: &OAuthOptions,
        pkce: Option<&PkceChallenge>,
    ) -> AuthResult<Url> {
        let query = authorize_query(provider, options, pkce);
        let pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.endpoint("/authorize", &pairs)
    }
}

fn redirect_query(redirect_to: Option<&str>) -> Vec<(&'static str, &str)> {
    redirect_to
        .map(|to| vec![("redirect_to", to)])
        .unwrap_or_default()
}

fn authorize_query(
    provider: &str,
    options: &OAuthOptions,
    pkce: Option<&PkceChallenge>,
) -> Vec<(String, String)> {
    let mut query = vec![("provider".to_string(), provider.to_string())];
    if let Some(redirect_to) = &options.redirect_to {
        query.push(("redirect_to".to_string(), redirect_to.clone()));
    }
    if let Some(scopes) = &options.scopes {
        query.push(("scopes".to_string(), scopes.clone()));
    }
    query.extend(options.query_params.iter().cloned());
    if let Some(pkce) = pkce {
        query.push(("code_challenge".to_string(), pkce.challenge.clone()));
        query.push((
            "code_challenge_method".to_string(),
            pkce.method.as_str().to_string(),
        ));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::CodeChallengeMethod;
    use crate::test_support::{error_response, json_response, session_json, MockTransport};

    fn api_with(transport: Arc<MockTransport>) -> AuthApi {
        let mut config = Config::new("https://auth.example.com/auth/v1/", "anon-key");
        config.headers.insert("x-tenant".to_string(), "acme".to_string());
        AuthApi::new(&config, transport).unwrap()
    }

    #[tokio::test]
    async fn test_headers_and_endpoint() {
        let transport = MockTransport::new(|_| json_response(200, session_json("a", "r", 3600)));
        let api = api_with(transport.clone());

        let session = api.refresh_token("refresh-1").await.unwrap();
        assert_eq!(session.access_token, "a");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.path(), "/auth/v1/token");
        assert_eq!(request.query_param("grant_type").as_deref(), Some("refresh_token"));
        assert_eq!(request.header_value("apikey"), Some("anon-key"));
        assert_eq!(request.header_value("Authorization"), Some("Bearer anon-key"));
        assert_eq!(request.header_value("X-Client-Info"), Some(CLIENT_INFO));
        assert_eq!(request.header_value("x-tenant"), Some("acme"));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_user_token_goes_in_bearer() {
        let transport = MockTransport::new(|_| json_response(200, crate::test_support::user_json()));
        let api = api_with(transport.clone());

        api.user("user-jwt").await.unwrap();
        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.header_value("Authorization"), Some("Bearer user-jwt"));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_structured_error_decoding() {
        let transport = MockTransport::new(|_| error_response(400, "refresh_token_not_found", "Invalid Refresh Token"));
        let api = api_with(transport);

        let err = api.refresh_token("stale").await.unwrap_err();
        match err {
            AuthError::Api(api_err) => {
                assert_eq!(api_err.status, 400);
                assert_eq!(api_err.message, "Invalid Refresh Token");
                assert_eq!(api_err.code.as_deref(), Some("refresh_token_not_found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_oauth_style_error_decoding() {
        let response = HttpResponse::new(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Already Used"}"#,
        );
        match decode_error(&response) {
            AuthError::Api(e) => {
                assert_eq!(e.message, "Invalid Refresh Token: Already Used");
                assert_eq!(e.code.as_deref(), Some("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unstructured_error_decoding() {
        let response = HttpResponse::new(502, "<html>Bad Gateway</html>");
        match decode_error(&response) {
            AuthError::Http { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("Bad Gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let no_message = HttpResponse::new(500, r#"{"status":"down"}"#);
        assert!(matches!(decode_error(&no_message), AuthError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_logout_scope_query() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(204, Vec::new())));
        let api = api_with(transport.clone());

        api.logout("jwt", SignOutScope::Others).await.unwrap();
        let request = &transport.requests()[0];
        assert_eq!(request.url.path(), "/auth/v1/logout");
        assert_eq!(request.query_param("scope").as_deref(), Some("others"));
    }

    #[tokio::test]
    async fn test_otp_tolerates_empty_body() {
        let transport = MockTransport::new(|_| json_response(200, serde_json::json!({})));
        let api = api_with(transport);
        let response = api.otp(&json!({"email": "a@b.c"}), None).await.unwrap();
        assert_eq!(response.message_id, None);

        let transport = MockTransport::new(|_| Ok(HttpResponse::new(200, Vec::new())));
        let response = api_with(transport).otp(&json!({"email": "a@b.c"}), None).await.unwrap();
        assert_eq!(response.message_id, None);
    }

    #[tokio::test]
    async fn test_otp_rejects_malformed_body() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(200, "<html>oops</html>")));
        let api = api_with(transport);
        assert!(matches!(
            api.otp(&json!({"phone": "+15550100"}), None).await,
            Err(AuthError::Json(_))
        ));
        assert!(matches!(
            api.resend(&json!({"email": "a@b.c"}), None).await,
            Err(AuthError::Json(_))
        ));
    }

    #[test]
    fn test_authorize_url() {
        let api = api_with(MockTransport::new(|_| unreachable!()));
        let options = OAuthOptions {
            redirect_to: Some("myapp://callback".to_string()),
            scopes: Some("repo user".to_string()),
            query_params: vec![("prompt".to_string(), "consent".to_string())],
        };
        let pkce = PkceChallenge {
            challenge: "challenge".to_string(),
            method: CodeChallengeMethod::S256,
        };

        let url = api.authorize_url("github", &options, Some(&pkce)).unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".into(), "github".into())));
        assert!(pairs.contains(&("redirect_to".into(), "myapp://callback".into())));
        assert!(pairs.contains(&("scopes".into(), "repo user".into())));
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
        assert!(pairs.contains(&("code_challenge".into(), "challenge".into())));
        assert!(pairs.contains(&("code_challenge_method".into(), "s256".into())));
    }

    #[tokio::test]
    async fn test_network_failure_passes_through() {
        let transport = MockTransport::new(|_| Err(AuthError::Network("connection refused".into())));
        let api = api_with(transport);
        let err = api.user("jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
        assert!(err.is_transient());
    }
}
