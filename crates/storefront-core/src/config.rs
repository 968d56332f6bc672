//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: API and
//! chat endpoints, the payload cipher secret, which credential backend to
//! use, and a few timing knobs.
//!
//! Configuration is stored at `~/.config/storefront-vendor/config.json`.
//! `STOREFRONT_*` environment variables override the file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{CredentialBackend, CredentialStore, FileBackend, KeyringBackend, MemoryBackend};
use crate::crypto::PayloadCipher;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "storefront-vendor";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws/chat";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXPIRY_WARNING_MINUTES: u64 = 5;

const ENV_API_URL: &str = "STOREFRONT_API_URL";
const ENV_WS_URL: &str = "STOREFRONT_WS_URL";
const ENV_CIPHER_SECRET: &str = "STOREFRONT_CIPHER_SECRET";
const ENV_CREDENTIAL_BACKEND: &str = "STOREFRONT_CREDENTIAL_BACKEND";

/// Where the credential pair is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Nothing survives the process
    Memory,
}

impl FromStr for CredentialBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub ws_url: String,
    pub cipher_secret: Option<String>,
    pub credential_backend: CredentialBackendKind,
    pub request_timeout_secs: u64,
    pub expiry_warning_minutes: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            cipher_secret: None,
            credential_backend: CredentialBackendKind::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            expiry_warning_minutes: DEFAULT_EXPIRY_WARNING_MINUTES,
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `STOREFRONT_*` overrides from the given lookup.
    /// Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = get(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Some(secret) = get(ENV_CIPHER_SECRET) {
            self.cipher_secret = Some(secret);
        }
        if let Some(kind) = get(ENV_CREDENTIAL_BACKEND) {
            match kind.parse() {
                Ok(kind) => self.credential_backend = kind,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_CREDENTIAL_BACKEND),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("logs"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_warning_lead(&self) -> Duration {
        Duration::from_secs(self.expiry_warning_minutes * 60)
    }

    /// The payload cipher. Without a configured secret the cipher still
    /// works, but no server response will decrypt.
    pub fn cipher(&self) -> PayloadCipher {
        match self.cipher_secret.as_deref() {
            Some(secret) => PayloadCipher::new(secret),
            None => {
                warn!("No cipher secret configured; encrypted responses will pass through");
                PayloadCipher::new("")
            }
        }
    }

    /// Keychain backend for the session. The account does not depend on
    /// which email logged in.
    pub fn keyring_backend(&self) -> KeyringBackend {
        KeyringBackend::session()
    }

    /// Open the credential store on the configured backend
    pub fn credential_store(&self) -> Result<CredentialStore> {
        let backend: Box<dyn CredentialBackend> = match self.credential_backend {
            CredentialBackendKind::File => Box::new(FileBackend::new(self.cache_dir()?)),
            CredentialBackendKind::Keyring => Box::new(self.keyring_backend()),
            CredentialBackendKind::Memory => Box::new(MemoryBackend),
        };
        Ok(CredentialStore::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::auth::Credential;

    /// Keychain stand-in: one shared map of account to credential
    #[derive(Clone, Default)]
    struct FakeKeychain {
        entries: Arc<Mutex<HashMap<String, Credential>>>,
    }

    struct FakeEntry {
        keychain: FakeKeychain,
        account: String,
    }

    impl CredentialBackend for FakeEntry {
        fn load(&self) -> Result<Option<Credential>> {
            Ok(self.keychain.entries.lock().get(&self.account).cloned())
        }

        fn save(&self, credential: &Credential) -> Result<()> {
            self.keychain
                .entries
                .lock()
                .insert(self.account.clone(), credential.clone());
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            self.keychain.entries.lock().remove(&self.account);
            Ok(())
        }
    }

    fn open_store(config: &Config, keychain: &FakeKeychain) -> CredentialStore {
        CredentialStore::new(Box::new(FakeEntry {
            keychain: keychain.clone(),
            account: config.keyring_backend().account().to_string(),
        }))
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:5000/api");
        assert_eq!(config.ws_url, "ws://localhost:3000/ws/chat");
        assert_eq!(config.credential_backend, CredentialBackendKind::File);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.expiry_warning_lead(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_base_url":"https://shop.example/api","credential_backend":"keyring"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://shop.example/api");
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.credential_backend, CredentialBackendKind::Keyring);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STOREFRONT_API_URL", "https://api.example/api"),
            ("STOREFRONT_WS_URL", "  "),
            ("STOREFRONT_CIPHER_SECRET", "s3cret"),
            ("STOREFRONT_CREDENTIAL_BACKEND", "MEMORY"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, "https://api.example/api");
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.cipher_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.credential_backend, CredentialBackendKind::Memory);
    }

    #[test]
    fn test_bad_backend_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == ENV_CREDENTIAL_BACKEND).then(|| "vault".to_string()));
        assert_eq!(config.credential_backend, CredentialBackendKind::File);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            last_email: Some("vendor@example.com".into()),
            expiry_warning_minutes: 2,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.last_email.as_deref(), Some("vendor@example.com"));
        assert_eq!(loaded.expiry_warning_minutes, 2);
    }

    #[test]
    fn test_keyring_session_survives_login_email_change() {
        let keychain = FakeKeychain::default();

        // First run: nobody has logged in yet
        let mut config = Config {
            credential_backend: CredentialBackendKind::Keyring,
            ..Default::default()
        };
        let store = open_store(&config, &keychain);
        store.set(Credential::new("access-1", Some("refresh-1".into())));
        config.last_email = Some("lola@example.com".into());

        // Next run picks up the same entry
        let reopened = open_store(&config, &keychain);
        assert_eq!(reopened.access_token().as_deref(), Some("access-1"));

        // So does a run after switching accounts
        config.last_email = Some("other@example.com".into());
        let switched = open_store(&config, &keychain);
        assert_eq!(switched.refresh_token().as_deref(), Some("refresh-1"));
        assert_eq!(keychain.entries.lock().len(), 1);
    }

    #[test]
    fn test_memory_backend_store_starts_empty() {
        let config = Config {
            credential_backend: CredentialBackendKind::Memory,
            ..Default::default()
        };
        let store = config.credential_store().unwrap();
        assert!(!store.has_access_token());
    }
}
