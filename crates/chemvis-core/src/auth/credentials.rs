use std::sync::Arc;

use tracing::warn;

use super::storage::{CredentialStorage, MemoryStorage, StorageError};

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Process-wide holder of the access and refresh tokens.
///
/// Clone is cheap and every clone sees the same underlying storage.
/// Reads never fail: a storage error is logged and reported as "absent".
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
}

impl CredentialStore {
    pub fn new(storage: impl CredentialStorage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// A store backed by memory only
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Store both tokens, overwriting anything stored before
    pub fn set_credentials(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, access)?;
        self.storage.set(REFRESH_TOKEN_KEY, refresh)?;
        Ok(())
    }

    pub fn set_access(&self, access: &str) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, access)
    }

    pub fn set_refresh(&self, refresh: &str) -> Result<(), StorageError> {
        self.storage.set(REFRESH_TOKEN_KEY, refresh)
    }

    /// The stored access token, if any
    pub fn access(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    /// The stored refresh token, if any
    pub fn refresh(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    /// Remove both tokens. Safe to call when nothing is stored.
    pub fn clear(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "Failed to remove stored credential");
            }
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read stored credential, treating as absent");
                None
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print token values
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::storage::FileStorage;

    /// Storage whose every operation fails
    pub(crate) struct BrokenStorage;

    impl CredentialStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
    }

    #[test]
    fn test_set_credentials_overwrites() {
        let store = CredentialStore::in_memory();
        store.set_credentials("a1", "r1").unwrap();
        store.set_credentials("a2", "r2").unwrap();

        assert_eq!(store.access().as_deref(), Some("a2"));
        assert_eq!(store.refresh().as_deref(), Some("r2"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = CredentialStore::in_memory();
        store.clear();

        store.set_credentials("a1", "r1").unwrap();
        store.clear();
        store.clear();

        assert_eq!(store.access(), None);
        assert_eq!(store.refresh(), None);
    }

    #[test]
    fn test_clones_share_storage() {
        let store = CredentialStore::in_memory();
        let other = store.clone();
        store.set_access("a1").unwrap();
        assert_eq!(other.access().as_deref(), Some("a1"));
    }

    #[test]
    fn test_empty_value_is_absent() {
        let store = CredentialStore::in_memory();
        store.set_credentials("", "").unwrap();
        assert_eq!(store.access(), None);
        assert_eq!(store.refresh(), None);
    }

    #[test]
    fn test_recovers_from_corrupt_credential_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"access_token": "a1", "refresh_tok"#).unwrap();
        let store = CredentialStore::new(FileStorage::new(&path));

        store.clear();
        assert!(!path.exists());

        std::fs::write(&path, "{not json").unwrap();
        store.set_credentials("a2", "r2").unwrap();
        assert_eq!(store.access().as_deref(), Some("a2"));
        assert_eq!(store.refresh().as_deref(), Some("r2"));
    }

    #[test]
    fn test_storage_failure_is_not_fatal() {
        let store = CredentialStore::new(BrokenStorage);

        assert!(matches!(
            store.set_credentials("a1", "r1"),
            Err(StorageError::Poisoned)
        ));
        assert_eq!(store.access(), None);
        assert_eq!(store.refresh(), None);
        store.clear();
    }
}
