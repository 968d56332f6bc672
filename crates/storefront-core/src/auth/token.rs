//! Access-token lifecycle: expiry checks, refresh, and scheduled
//! expiry actions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::credentials::{Credential, CredentialStore};
use crate::api::transport::{HttpRequest, HttpTransport};
use crate::utils::truncate_string;

/// Path of the identity endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/vendors/auth/refresh";

/// Default lead time for the "session about to expire" warning
pub const DEFAULT_WARNING_LEAD: Duration = Duration::from_secs(5 * 60);

/// Maximum length for response bodies kept in refresh errors
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a refresh failed. Every variant is terminal for the session:
/// the credential store has already been cleared when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Session expired - no refresh token available")]
    MissingRefreshToken,

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

/// Decode the claims segment of a JWT without verifying it
pub fn decode_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Extract the `exp` claim (unix seconds) from a JWT without verifying it.
/// Returns `None` for anything that is not a decodable token.
pub fn decode_expiry(token: &str) -> Option<i64> {
    let claims = decode_claims(token)?;
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Handle to an action scheduled relative to token expiry.
#[derive(Debug)]
pub struct ScheduledAction {
    handle: AbortHandle,
    fires_in: Duration,
}

impl ScheduledAction {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Delay from scheduling until the action fires
    pub fn fires_in(&self) -> Duration {
        self.fires_in
    }
}

type PendingRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

struct Inner {
    store: CredentialStore,
    transport: Arc<dyn HttpTransport>,
    refresh_url: String,
    inflight: Mutex<Option<PendingRefresh>>,
    timers: Mutex<Vec<AbortHandle>>,
}

/// Decides token validity and performs refreshes.
///
/// Concurrent `refresh()` calls share one request to the identity
/// endpoint. Clone is cheap and shares state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(store: CredentialStore, transport: Arc<dyn HttpTransport>, api_base_url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                refresh_url: format!("{}{}", api_base_url.trim_end_matches('/'), REFRESH_PATH),
                inflight: Mutex::new(None),
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Participant id from the `id` claim of the current access token
    pub fn subject_id(&self) -> Option<String> {
        let claims = decode_claims(&self.inner.store.access_token()?)?;
        crate::models::vendor::id_from_value(claims.get("id")?)
    }

    /// Expiry of the current access token, decoded fresh on every call
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let token = self.inner.store.access_token()?;
        let exp = decode_expiry(&token)?;
        Utc.timestamp_opt(exp, 0).single()
    }

    /// True when there is no access token, it cannot be decoded, or its
    /// `exp` is at or before the current time
    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(exp) => exp <= Utc::now(),
            None => true,
        }
    }

    pub fn time_until_expiry(&self) -> Option<chrono::Duration> {
        self.expires_at().map(|exp| exp - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry().map(|d| d.num_minutes().max(0))
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Joins an in-flight refresh if there is one. On failure the session
    /// is ended (store cleared, scheduled actions cancelled).
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let pending = {
            let mut slot = self.inner.inflight.lock();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let pending = Self::refresh_task(Arc::downgrade(&self.inner)).boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn refresh_task(inner: Weak<Inner>) -> Result<Credential, RefreshError> {
        let Some(inner) = inner.upgrade() else {
            return Err(RefreshError::Transport("session context dropped".to_string()));
        };
        let manager = TokenManager { inner };
        let result = manager.perform_refresh().await;
        manager.inner.inflight.lock().take();
        result
    }

    async fn perform_refresh(&self) -> Result<Credential, RefreshError> {
        let Some(refresh_token) = self.inner.store.refresh_token() else {
            warn!("No refresh token available, ending session");
            self.logout();
            return Err(RefreshError::MissingRefreshToken);
        };

        info!("Refreshing access token");
        let request = HttpRequest::post_json(
            self.inner.refresh_url.clone(),
            json!({ "refresh_token": refresh_token }),
        );

        let outcome = match self.inner.transport.execute(request).await {
            Ok(response) if response.status.is_success() => Self::parse_refresh_body(&response.body),
            Ok(response) => Err(RefreshError::Rejected {
                status: response.status.as_u16(),
                body: truncate_string(&response.body, MAX_ERROR_BODY_LENGTH),
            }),
            Err(e) => Err(RefreshError::Transport(e.to_string())),
        };

        match outcome {
            Ok(tokens) => {
                let credential = Credential {
                    access_token: Some(tokens.token),
                    refresh_token: tokens.refresh_token.or(Some(refresh_token)),
                };
                self.inner.store.set(credential.clone());
                debug!(expires_at = ?self.expires_at(), "Access token refreshed");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.logout();
                Err(e)
            }
        }
    }

    /// Read `{token, refresh_token?}` either at the top level or under `data`
    fn parse_refresh_body(body: &str) -> Result<RefreshResponse, RefreshError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        let candidate = match value.get("data") {
            Some(data) if value.get("token").is_none() => data.clone(),
            _ => value,
        };
        serde_json::from_value(candidate).map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }

    /// Run `action` once, `offset` before the current token expires.
    ///
    /// Returns `None` when there is no decodable token or no Tokio runtime
    /// to run the timer on. A fire time already in the past runs the action
    /// immediately. `logout()` cancels every pending action.
    pub fn schedule_expiry_action<F>(&self, offset: Duration, action: F) -> Option<ScheduledAction>
    where
        F: FnOnce() + Send + 'static,
    {
        let expires_at = self.expires_at()?;
        let offset = chrono::Duration::from_std(offset).ok()?;
        let fires_in = (expires_at - offset - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, expiry action not scheduled");
            return None;
        };
        let task = runtime.spawn(async move {
            tokio::time::sleep(fires_in).await;
            action();
        });
        let handle = task.abort_handle();

        let mut timers = self.inner.timers.lock();
        timers.retain(|h| !h.is_finished());
        timers.push(handle.clone());
        debug!(fires_in_secs = fires_in.as_secs(), "Scheduled expiry action");

        Some(ScheduledAction { handle, fires_in })
    }

    /// End the session when the token expires
    pub fn schedule_auto_logout(&self) -> Option<ScheduledAction> {
        let manager = self.clone();
        self.schedule_expiry_action(Duration::ZERO, move || {
            info!("Access token expired, logging out");
            manager.logout();
        })
    }

    /// Call `notify` `lead` before the token expires
    pub fn schedule_expiry_warning<F>(&self, lead: Duration, notify: F) -> Option<ScheduledAction>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_expiry_action(lead, notify)
    }

    pub fn cancel_scheduled(&self) {
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
    }

    /// Clear the credential and cancel all scheduled expiry actions
    pub fn logout(&self) {
        self.inner.store.clear();
        self.cancel_scheduled();
    }
}
