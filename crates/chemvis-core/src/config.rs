//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API origin, the last used username and where
//! credentials are kept.
//!
//! Configuration is stored at `~/.config/chemvis/config.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FileStorage, KeyringStorage};

/// Application name used for config/data directory paths and the keychain service
const APP_NAME: &str = "chemvis";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credential file name (file backend only)
const CREDENTIALS_FILE: &str = "credentials.json";

/// Environment variable holding the API origin
pub const API_URL_ENV: &str = "CHEMVIS_API_URL";

/// Origin used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Where access and refresh tokens are persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    pub last_username: Option<String>,
    #[serde(default)]
    pub credential_backend: CredentialBackend,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn credentials_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(CREDENTIALS_FILE))
    }

    /// The API origin: an explicit override (flag or env), then the config file, then the default
    pub fn api_origin(&self, override_url: Option<&str>) -> String {
        override_url
            .filter(|u| !u.trim().is_empty())
            .or(self.api_url.as_deref().filter(|u| !u.trim().is_empty()))
            .unwrap_or(DEFAULT_API_URL)
            .trim()
            .to_string()
    }

    /// The credential store for the configured backend
    pub fn credential_store(&self) -> Result<CredentialStore> {
        Ok(match self.credential_backend {
            CredentialBackend::File => CredentialStore::new(FileStorage::new(Self::credentials_path()?)),
            CredentialBackend::Keyring => CredentialStore::new(KeyringStorage::new(APP_NAME)),
        })
    }
}

/// The root all API paths hang off, `<origin>/api`
pub fn api_root(origin: &str) -> String {
    format!("{}/api", origin.trim().trim_end_matches('/'))
}
