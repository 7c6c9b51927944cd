//! Shared fixtures for unit tests.

use crate::events::AuthChangeEvent;
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::AuthResult;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const USER_ID: &str = "6f1c2b8e-3d4a-4b5c-9e8f-0a1b2c3d4e5f";

type Handler = dyn Fn(&HttpRequest) -> AuthResult<HttpResponse> + Send + Sync;

/// Transport answering every request with a scripted handler.
pub struct MockTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    /// Only requests whose path ends with this are delayed.
    slow_path: Option<String>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> AuthResult<HttpResponse> + Send + Sync + 'static,
    {
        Self::with_delay(None, handler)
    }

    pub fn with_delay<F>(delay: Option<Duration>, handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> AuthResult<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay,
            slow_path: None,
        })
    }

    /// Delay only requests to paths ending with `suffix`.
    pub fn with_slow_path<F>(suffix: &str, delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> AuthResult<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            slow_path: Some(suffix.to_string()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests whose path ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let slow = match &self.slow_path {
            Some(suffix) => request.url.path().ends_with(suffix.as_str()),
            None => true,
        };
        if let (Some(delay), true) = (self.delay, slow) {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&request)
    }
}

/// An unsigned JWT carrying `claims`.
pub fn make_jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// A JWT for the test user expiring at `exp`.
pub fn jwt_expiring_at(exp: i64) -> String {
    make_jwt(json!({
        "sub": USER_ID,
        "exp": exp,
        "aud": "authenticated",
        "role": "authenticated",
        "email": "user@example.com"
    }))
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn user_json() -> Value {
    json!({
        "id": USER_ID,
        "aud": "authenticated",
        "role": "authenticated",
        "email": "user@example.com",
        "app_metadata": {"provider": "email"},
        "user_metadata": {},
        "identities": [],
        "created_at": "2024-01-01T00:00:00Z"
    })
}

/// Session payload as the token endpoint returns it.
pub fn session_json(access_token: &str, refresh_token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": expires_in,
        "expires_at": now() + expires_in,
        "refresh_token": refresh_token,
        "user": user_json()
    })
}

pub fn json_response(status: u16, body: Value) -> AuthResult<HttpResponse> {
    Ok(HttpResponse::new(status, body.to_string()))
}

pub fn error_response(status: u16, code: &str, message: &str) -> AuthResult<HttpResponse> {
    json_response(status, json!({ "code": status, "error_code": code, "msg": message }))
}

/// Decoded JSON body of a recorded request.
pub fn body_of(request: &HttpRequest) -> Value {
    request
        .body
        .as_deref()
        .map(|b| serde_json::from_slice(b).unwrap())
        .unwrap_or(Value::Null)
}

/// Poll `condition` until it holds or a second elapses.
pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not met in time");
}

/// Events seen by a listener, with the access token of each session.
pub type EventLog = Arc<Mutex<Vec<(AuthChangeEvent, Option<String>)>>>;

pub fn event_recorder() -> (
    EventLog,
    impl Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let listener = move |event: AuthChangeEvent, session: Option<Session>| {
        sink.lock().push((event, session.map(|s| s.access_token)));
    };
    (log, listener)
}

/// Event kinds in delivery order.
pub fn event_kinds(log: &EventLog) -> Vec<AuthChangeEvent> {
    log.lock().iter().map(|(event, _)| *event).collect()
}
