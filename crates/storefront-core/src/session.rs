//! Shared session context.
//!
//! `SessionContext` owns the credential store, the token manager and the
//! payload cipher. The request pipeline, the vendor API and the realtime
//! session are all built from it, so every surface sees the same
//! credential and the same single-flight refresh.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::api::{HttpTransport, ReqwestTransport, RequestPipeline, VendorApi};
use crate::auth::{CredentialStore, TokenManager};
use crate::config::Config;
use crate::crypto::PayloadCipher;
use crate::models::ParticipantRole;
use crate::realtime::RealtimeSession;

/// Clone is cheap; clones share the same credential and timers.
#[derive(Clone)]
pub struct SessionContext {
    api_base_url: String,
    ws_url: String,
    tokens: TokenManager,
    transport: Arc<dyn HttpTransport>,
    cipher: PayloadCipher,
}

impl SessionContext {
    pub fn new(
        api_base_url: &str,
        ws_url: &str,
        store: CredentialStore,
        transport: Arc<dyn HttpTransport>,
        cipher: PayloadCipher,
    ) -> Self {
        let tokens = TokenManager::new(store, transport.clone(), api_base_url);
        Self {
            api_base_url: api_base_url.to_string(),
            ws_url: ws_url.to_string(),
            tokens,
            transport,
            cipher,
        }
    }

    /// Build the production context: configured credential backend and a
    /// reqwest transport
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = config
            .credential_store()
            .context("Failed to open credential store")?;
        let transport = ReqwestTransport::new(config.request_timeout())
            .context("Failed to build HTTP client")?;
        debug!(api = %config.api_base_url, ws = %config.ws_url, "Session context ready");
        Ok(Self::new(
            &config.api_base_url,
            &config.ws_url,
            store,
            Arc::new(transport),
            config.cipher(),
        ))
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.tokens.store()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn cipher(&self) -> &PayloadCipher {
        &self.cipher
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials().has_access_token() && !self.tokens.is_expired()
    }

    pub fn pipeline(&self) -> RequestPipeline {
        RequestPipeline::new(
            &self.api_base_url,
            self.transport.clone(),
            self.tokens.clone(),
            self.cipher.clone(),
        )
    }

    pub fn api(&self) -> VendorApi {
        VendorApi::new(self.pipeline())
    }

    /// A fresh, unconnected chat session against the configured endpoint
    pub fn realtime(&self, role: ParticipantRole) -> RealtimeSession {
        RealtimeSession::new(self.ws_url.clone(), role)
    }
}
