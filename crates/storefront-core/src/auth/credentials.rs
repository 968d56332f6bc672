use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "storefront-vendor";

/// Keychain account holding the session. Fixed, so the entry survives a
/// change of login email.
pub const SESSION_ACCOUNT: &str = "session";

/// Access and refresh token pair for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Durable storage for the credential.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps nothing; the credential lives only as long as the process.
pub struct MemoryBackend;

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(None)
    }

    fn save(&self, _credential: &Credential) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON session file in the cache directory.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
        }
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        let credential: Credential = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credential)?;
        // Write then rename so a crash never leaves a half-written session
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// OS keychain entry holding the credential as JSON.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    /// The entry the vendor session is kept under
    pub fn session() -> Self {
        Self::new(SESSION_ACCOUNT)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<Credential>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let credential = serde_json::from_str(&secret)
                    .context("Failed to parse credential from keychain")?;
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let secret = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credential in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

struct StoreInner {
    current: RwLock<Credential>,
    backend: Box<dyn CredentialBackend>,
}

/// Owner of the session credential.
///
/// Reads and writes are synchronous. Every mutation updates memory and the
/// backend under one write lock, so readers never see a half-applied change.
/// Clone is cheap and shares the same credential.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl CredentialStore {
    /// Create a store, seeding it from whatever the backend has persisted
    pub fn new(backend: Box<dyn CredentialBackend>) -> Self {
        let initial = match backend.load() {
            Ok(Some(credential)) => {
                debug!("Loaded persisted credential");
                credential
            }
            Ok(None) => Credential::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted credential");
                Credential::default()
            }
        };
        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(initial),
                backend,
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend))
    }

    pub fn get(&self) -> Credential {
        self.inner.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.current.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.current.read().refresh_token.clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.inner.current.read().access_token.is_some()
    }

    pub fn set(&self, credential: Credential) {
        let mut current = self.inner.current.write();
        if let Err(e) = self.inner.backend.save(&credential) {
            warn!(error = %e, "Failed to persist credential");
        }
        *current = credential;
    }

    pub fn clear(&self) {
        let mut current = self.inner.current.write();
        if let Err(e) = self.inner.backend.clear() {
            warn!(error = %e, "Failed to clear persisted credential");
        }
        *current = Credential::default();
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.inner.current.read();
        f.debug_struct("CredentialStore")
            .field("has_access_token", &current.access_token.is_some())
            .field("has_refresh_token", &current.refresh_token.is_some())
            .finish()
    }
}
