//! Storage trait definitions.

use crate::{StorageError, StorageResult};

/// Trait for secure storage backends.
///
/// Implementations must not call back into the session layer; they are
/// invoked while the session lock is held.
pub trait SecureStorage: Send + Sync {
    /// Store a value, replacing any previous value under the same key.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Remove a value. Returns whether something was removed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Retrieve a value as a UTF-8 string.
    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }
}
