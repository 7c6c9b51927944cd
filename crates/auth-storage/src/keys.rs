//! Storage key constants.

/// Storage keys used by the auth client.
pub struct StorageKeys;

impl StorageKeys {
    /// Default key for the persisted session record.
    pub const DEFAULT_SESSION: &'static str = "supabase.auth.token";

    /// Suffix appended to the session key for the pending PKCE verifier.
    pub const CODE_VERIFIER_SUFFIX: &'static str = "-code-verifier";

    /// Key of the pending PKCE verifier for a given session key.
    pub fn code_verifier(session_key: &str) -> String {
        format!("{}{}", session_key, Self::CODE_VERIFIER_SUFFIX)
    }
}
