//! Authentication module for managing the vendor session.
//!
//! This module provides:
//! - `CredentialStore`: the single owner of the access/refresh token pair,
//!   persisted through a pluggable backend (session file or OS keychain)
//! - `TokenManager`: expiry checks, single-flight refresh, and scheduled
//!   expiry actions (auto-logout, pre-expiry warning)

pub mod credentials;
pub mod token;

pub use credentials::{
    Credential, CredentialBackend, CredentialStore, FileBackend, KeyringBackend, MemoryBackend,
};
pub use token::{decode_claims, decode_expiry, RefreshError, ScheduledAction, TokenManager, REFRESH_PATH};
