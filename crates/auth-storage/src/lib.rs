//! Secure storage abstraction for the auth client.
//!
//! The session layer persists its record through [`SecureStorage`]. Two
//! implementations ship with the crate:
//! - [`MemoryStorage`] for tests and ephemeral clients
//! - [`FileStorage`] for a private per-user directory

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Platform-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Key cannot be mapped onto the backend
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        // Test set and get
        storage.set("test_key", b"test_value").unwrap();
        assert_eq!(
            storage.get("test_key").unwrap(),
            Some(b"test_value".to_vec())
        );

        // Test has
        assert!(storage.has("test_key").unwrap());
        assert!(!storage.has("nonexistent").unwrap());

        // Test remove
        assert!(storage.remove("test_key").unwrap());
        assert!(!storage.remove("test_key").unwrap());
        assert_eq!(storage.get("test_key").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_get_string_rejects_invalid_utf8() {
        let storage = MemoryStorage::new();
        storage.set("bin", &[0xff, 0xfe]).unwrap();

        assert!(matches!(
            storage.get_string("bin"),
            Err(StorageError::Encoding(_))
        ));
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(StorageKeys::DEFAULT_SESSION, "supabase.auth.token");
        assert_eq!(
            StorageKeys::code_verifier("my.key"),
            "my.key-code-verifier"
        );
    }
}
