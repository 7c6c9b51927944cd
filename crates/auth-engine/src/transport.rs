//! HTTP transport seam.
//!
//! The wire layer builds [`HttpRequest`]s and hands them to an
//! [`HttpTransport`]; production uses reqwest, tests script responses.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// A fully built request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize `body` as JSON and set the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> AuthResult<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self.header("Content-Type", "application/json"))
    }

    /// First header value with the given name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a query parameter on the request URL.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Status and raw body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Like [`json`](Self::json), but a blank body yields `T::default()`.
    pub fn json_or_default<T: DeserializeOwned + Default>(&self) -> AuthResult<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes requests against the auth server.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Returns `Err` only when no response was received.
    async fn execute(&self, request: HttpRequest) -> AuthResult<HttpResponse>;
}

/// Default transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Connect timeout only; no overall request deadline is imposed here.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let mut builder = self.http_client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://auth.example.com/token?grant_type=password").unwrap();
        let request = HttpRequest::new(Method::POST, url)
            .header("apikey", "key")
            .json(&json!({"email": "user@example.com"}))
            .unwrap();

        assert_eq!(request.header_value("APIKEY"), Some("key"));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
        assert_eq!(request.query_param("grant_type").as_deref(), Some("password"));
        assert_eq!(request.query_param("missing"), None);

        let body: serde_json::Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["email"], "user@example.com");
    }

    #[test]
    fn test_response_helpers() {
        let ok = HttpResponse::new(204, Vec::new());
        assert!(ok.is_success());

        let failed = HttpResponse::new(500, "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.text(), "boom");
        assert!(failed.json::<serde_json::Value>().is_err());
    }
}
