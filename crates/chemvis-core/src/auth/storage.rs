//! Durable key/value media for credentials.
//!
//! The credential store never touches a medium directly; it goes through
//! [`CredentialStorage`] so the medium can be a JSON file, the OS keychain,
//! or plain memory in tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Credential file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential storage lock was poisoned")]
    Poisoned,
}

/// A synchronous key/value medium that survives process restarts.
pub trait CredentialStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Non-durable storage for tests and short-lived embeddings.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().map_err(|_| StorageError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

/// Stores all keys in a single JSON object on disk.
///
/// The file is rewritten on every change and deleted once it holds no keys.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut values = match self.read_all() {
            Ok(values) => values,
            Err(StorageError::Corrupt(e)) => {
                warn!(path = %self.path.display(), error = %e, "Overwriting corrupt credential file");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        match self.read_all() {
            Ok(mut values) => {
                if values.remove(key).is_some() {
                    self.write_all(&values)?;
                }
                Ok(())
            }
            Err(StorageError::Corrupt(e)) => {
                // Nothing in it can be recovered
                warn!(path = %self.path.display(), error = %e, "Deleting corrupt credential file");
                std::fs::remove_file(&self.path)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Stores each key as a separate entry in the OS keychain.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl CredentialStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, key, "No keychain entry to delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("access_token").unwrap(), None);

        storage.set("access_token", "abc").unwrap();
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("abc"));

        storage.remove("access_token").unwrap();
        storage.remove("access_token").unwrap(); // idempotent
        assert_eq!(storage.get("access_token").unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let storage = FileStorage::new(&path);
        storage.set("access_token", "a1").unwrap();
        storage.set("refresh_token", "r1").unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("a1"));
        assert_eq!(reopened.get("refresh_token").unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn test_file_storage_deletes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let storage = FileStorage::new(&path);
        storage.set("access_token", "a1").unwrap();
        assert!(path.exists());

        storage.remove("access_token").unwrap();
        assert!(!path.exists());

        // Removing from a missing file is fine
        storage.remove("access_token").unwrap();
    }

    #[test]
    fn test_file_storage_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get("access_token"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_file_storage_overwrites_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"access_token": "a1", "refresh_tok"#).unwrap();

        let storage = FileStorage::new(&path);
        storage.set("access_token", "a2").unwrap();
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn test_file_storage_remove_deletes_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"access_token": "a1", "refresh_tok"#).unwrap();

        let storage = FileStorage::new(&path);
        storage.remove("refresh_token").unwrap();
        assert!(!path.exists());
        assert_eq!(storage.get("access_token").unwrap(), None);
    }
}
