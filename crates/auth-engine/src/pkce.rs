//! PKCE (Proof Key for Code Exchange) verifier/challenge helpers and the
//! store holding the one pending verifier.

use crate::session_manager::blocking;
use crate::{AuthError, AuthResult};
use auth_storage::{SecureStorage, StorageKeys};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

pub use auth_config::CodeChallengeMethod;

/// Number of random bytes behind each verifier.
const VERIFIER_BYTES: usize = 64;

/// Generate a cryptographically random code_verifier.
///
/// 64 random bytes, base64url encoded without padding (86 characters),
/// within the RFC 7636 43-128 character range.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the code_challenge for a verifier.
///
/// `S256`: BASE64URL(SHA256(verifier)). `Plain`: the verifier itself.
pub fn generate_code_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Values sent to the server when a PKCE flow starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

/// Holds the single pending verifier in storage.
///
/// Starting a flow overwrites it; a successful exchange clears it.
#[derive(Clone)]
pub struct CodeVerifierStore {
    storage: Arc<dyn SecureStorage>,
    key: String,
}

impl std::fmt::Debug for CodeVerifierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeVerifierStore")
            .field("key", &self.key)
            .finish()
    }
}

impl CodeVerifierStore {
    pub fn new(storage: Arc<dyn SecureStorage>, session_key: &str) -> Self {
        Self {
            storage,
            key: StorageKeys::code_verifier(session_key),
        }
    }

    /// Generate a verifier, store it, and return the matching challenge.
    pub async fn begin(&self, method: CodeChallengeMethod) -> AuthResult<PkceChallenge> {
        let verifier = generate_code_verifier();
        self.set(&verifier).await?;
        debug!(method = method.as_str(), "Started PKCE flow");
        Ok(PkceChallenge {
            challenge: generate_code_challenge(&verifier, method),
            method,
        })
    }

    pub async fn set(&self, verifier: &str) -> AuthResult<()> {
        let (storage, key) = (self.storage.clone(), self.key.clone());
        let bytes = verifier.as_bytes().to_vec();
        blocking(move || Ok(storage.set(&key, &bytes)?)).await
    }

    pub async fn get(&self) -> AuthResult<Option<String>> {
        let (storage, key) = (self.storage.clone(), self.key.clone());
        blocking(move || Ok(storage.get_string(&key)?)).await
    }

    /// The pending verifier, or `CodeVerifierNotFound`.
    pub async fn require(&self) -> AuthResult<String> {
        self.get().await?.ok_or(AuthError::CodeVerifierNotFound)
    }

    pub async fn clear(&self) -> AuthResult<()> {
        let (storage, key) = (self.storage.clone(), self.key.clone());
        blocking(move || {
            storage.remove(&key)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_storage::MemoryStorage;

    #[test]
    fn generate_code_verifier_is_url_safe_and_long_enough() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn generate_code_verifier_produces_unique_values() {
        assert_ne!(generate_code_verifier(), generate_code_verifier());
    }

    #[test]
    fn s256_challenge_is_deterministic() {
        let verifier = generate_code_verifier();
        let c1 = generate_code_challenge(&verifier, CodeChallengeMethod::S256);
        let c2 = generate_code_challenge(&verifier, CodeChallengeMethod::S256);
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 43);
    }

    #[test]
    fn s256_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636
        let challenge = generate_code_challenge(
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
            CodeChallengeMethod::S256,
        );
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn plain_challenge_is_the_verifier() {
        assert_eq!(
            generate_code_challenge("verifier", CodeChallengeMethod::Plain),
            "verifier"
        );
    }

    #[tokio::test]
    async fn verifier_store_holds_one_pending_verifier() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CodeVerifierStore::new(storage.clone(), "supabase.auth.token");

        assert!(matches!(store.require().await, Err(AuthError::CodeVerifierNotFound)));

        let first = store.begin(CodeChallengeMethod::S256).await.unwrap();
        let verifier = store.require().await.unwrap();
        assert_eq!(
            first.challenge,
            generate_code_challenge(&verifier, CodeChallengeMethod::S256)
        );

        // A new flow overwrites the previous verifier
        store.begin(CodeChallengeMethod::S256).await.unwrap();
        assert_ne!(store.require().await.unwrap(), verifier);
        assert_eq!(storage.len(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
        assert!(matches!(store.require().await, Err(AuthError::CodeVerifierNotFound)));
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn verifier_store_set_round_trips() {
        let store = CodeVerifierStore::new(Arc::new(MemoryStorage::new()), "custom.key");
        store.set("verifier-1").await.unwrap();
        assert_eq!(store.get().await.unwrap().as_deref(), Some("verifier-1"));
    }
}
