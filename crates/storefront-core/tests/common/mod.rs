//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::StatusCode;
use storefront_core::api::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use storefront_core::auth::{Credential, CredentialStore, REFRESH_PATH};
use storefront_core::{PayloadCipher, SessionContext};

pub const API_BASE: &str = "http://api.test/api";
pub const WS_URL: &str = "ws://127.0.0.1:1/ws/chat";
pub const SECRET: &str = "test-secret";

/// Unsigned JWT with the given `exp` claim
pub fn jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"v1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, claims)
}

/// JWT expiring `secs` from now (negative for already expired)
pub fn jwt_expiring_in(secs: i64) -> String {
    jwt(Utc::now().timestamp() + secs)
}

pub fn cipher() -> PayloadCipher {
    PayloadCipher::new(SECRET)
}

pub fn respond(status: StatusCode, body: impl Into<String>) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(status, body))
}

pub fn ok_json(body: &str) -> Result<HttpResponse, TransportError> {
    respond(StatusCode::OK, body)
}

pub fn refresh_ok(token: &str) -> Result<HttpResponse, TransportError> {
    ok_json(&format!(r#"{{"token":"{}","refresh_token":"refresh-2"}}"#, token))
}

/// Scripted transport. Refresh calls and ordinary calls are served from
/// separate queues; every request is recorded.
#[derive(Default)]
pub struct ScriptedTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    refreshes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    refresh_delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<HttpResponse, TransportError>) {
        self.refreshes.lock().push_back(response);
    }

    pub fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.requests.lock().iter().filter(|r| r.url.ends_with(REFRESH_PATH)).count()
    }

    /// Non-refresh requests, in order
    pub fn api_calls(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| !r.url.ends_with(REFRESH_PATH))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let is_refresh = request.url.ends_with(REFRESH_PATH);
        self.requests.lock().push(request);

        if is_refresh {
            let delay = *self.refresh_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = self.refreshes.lock().pop_front();
            next.unwrap_or_else(|| respond(StatusCode::UNAUTHORIZED, r#"{"error":"no refresh scripted"}"#))
        } else {
            let next = self.responses.lock().pop_front();
            next.unwrap_or_else(|| respond(StatusCode::INTERNAL_SERVER_ERROR, "no response scripted"))
        }
    }
}

/// Context over a scripted transport with the given credential
pub fn context(transport: &Arc<ScriptedTransport>, credential: Option<Credential>) -> SessionContext {
    let store = CredentialStore::in_memory();
    if let Some(credential) = credential {
        store.set(credential);
    }
    SessionContext::new(API_BASE, WS_URL, store, transport.clone(), cipher())
}
