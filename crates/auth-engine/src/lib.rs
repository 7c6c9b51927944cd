//! Client-side authentication session lifecycle.
//!
//! This crate provides:
//! - Session and persisted-record types
//! - A session manager with single-flight token refresh and durable storage
//! - Auth state change notifications with per-listener ordering
//! - PKCE helpers and the pending code verifier store
//! - The `AuthClient` orchestrating sign-in, sign-up, verification and sign-out
//!   against a GoTrue-style auth server

mod api;
mod auth_fsm;
mod client;
mod error;
mod events;
mod jwt;
mod params;
mod pkce;
mod session;
mod session_manager;
mod transport;

#[cfg(test)]
mod test_support;

pub use api::{decode_error, AuthApi, CLIENT_INFO};
pub use auth_fsm::client_machine;
pub use auth_fsm::{ClientMachine, ClientMachineInput, ClientMachineState, ClientState};
pub use client::AuthClient;
pub use error::{ApiError, AuthError, AuthResult};
pub use events::{AuthChangeEvent, EventEmitter, ListenerHandle};
pub use jwt::{decode_claims, JwtClaims};
pub use params::{
    Identity, OAuthOptions, OAuthResponse, OpenIdConnectCredentials, OtpCredentials,
    OtpResponse, OtpType, PasswordCredentials, ResendParams, SignOutScope, SignUpCredentials,
    SmsChannel, SsoResponse, SsoTarget, UrlSession, UserAttributes, VerifyOtpParams,
    VerifyTarget,
};
pub use pkce::{
    generate_code_challenge, generate_code_verifier, CodeChallengeMethod, CodeVerifierStore,
    PkceChallenge,
};
pub use session::{
    AuthResponse, Session, StoredSession, User, UserIdentity, EXPIRY_MARGIN_SECS,
};
pub use session_manager::{SessionGeneration, SessionManager, SessionRefresher, SessionState};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
