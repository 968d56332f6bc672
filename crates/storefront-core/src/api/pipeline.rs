//! Request pipeline applied to every REST call.
//!
//! Per request:
//!
//! ```text
//! PENDING -> (REFRESH) -> SENT -> SUCCESS
//!                              -> FAILURE
//!                              -> UNAUTHORIZED -> RETRY_SENT -> SUCCESS | FAILURE
//! ```
//!
//! The outbound phase refreshes an expired token and attaches the bearer
//! header. The inbound phase normalizes the body (decrypt, else parse as
//! JSON, else keep the raw string) for success and error responses alike.
//! A 401 triggers at most one refresh-and-resend; any failure after that
//! ends the session.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{FormPart, HttpRequest, HttpTransport, RequestBody};
use crate::auth::{TokenManager, REFRESH_PATH};
use crate::crypto::PayloadCipher;
use crate::models::ApiEnvelope;

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Unauthenticated requests skip refresh-before-send, the bearer
    /// header, and the 401 retry
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Serialize(e.to_string()))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// A successful response with its body already normalized.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    pub fn envelope(self) -> ApiEnvelope {
        ApiEnvelope::from_body(self.body, self.status.is_success())
    }
}

/// Outcome of one transmission, before the retry decision
enum Sent {
    Success(ApiResponse),
    Unauthorized(Value),
    Failed(StatusCode, Value),
}

/// Authenticating, decrypting HTTP pipeline.
/// Clone is cheap and shares the session.
#[derive(Clone)]
pub struct RequestPipeline {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    tokens: TokenManager,
    cipher: PayloadCipher,
}

impl RequestPipeline {
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        tokens: TokenManager,
        cipher: PayloadCipher,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            tokens,
            cipher,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn is_refresh_endpoint(path: &str) -> bool {
        path.contains(REFRESH_PATH)
    }

    /// Send a request through the full pipeline
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let guarded = request.authenticated && !Self::is_refresh_endpoint(&request.path);

        if guarded && self.tokens.is_expired() {
            debug!(path = %request.path, "Access token expired, refreshing before send");
            self.tokens.refresh().await?;
        }

        let mut http = HttpRequest {
            method: request.method,
            url: format!("{}{}", self.base_url, request.path),
            query: request.query,
            bearer: None,
            body: request.body,
        };
        if guarded {
            http.bearer = self.tokens.store().access_token();
        }

        let unauthorized_body = match self.transmit(&http).await? {
            Sent::Success(response) => return Ok(response),
            Sent::Failed(status, body) => return Err(ApiError::from_status(status, body)),
            Sent::Unauthorized(body) if !guarded => {
                return Err(ApiError::from_status(StatusCode::UNAUTHORIZED, body))
            }
            Sent::Unauthorized(body) => body,
        };

        warn!(url = %http.url, "Unauthorized response, refreshing token and retrying once");
        let credential = match self.tokens.refresh().await {
            Ok(credential) => credential,
            Err(e) => {
                debug!(body = %unauthorized_body, "Refresh after 401 failed");
                return Err(e.into());
            }
        };
        http.bearer = credential.access_token;

        let retried = match self.transmit(&http).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(url = %http.url, error = %e, "Retry failed, ending session");
                self.tokens.logout();
                return Err(e);
            }
        };
        match retried {
            Sent::Success(response) => Ok(response),
            Sent::Unauthorized(body) => {
                warn!(url = %http.url, "Still unauthorized after refresh, ending session");
                self.tokens.logout();
                Err(ApiError::UnauthorizedRetryExhausted { body })
            }
            Sent::Failed(status, body) => {
                warn!(url = %http.url, status = %status, "Retry failed, ending session");
                self.tokens.logout();
                Err(ApiError::from_status(status, body))
            }
        }
    }

    async fn transmit(&self, request: &HttpRequest) -> Result<Sent, ApiError> {
        debug!(method = %request.method, url = %request.url, "Sending request");
        let response = self.transport.execute(request.clone()).await?;
        let body = self.normalize_body(response.body);

        Ok(if response.status.is_success() {
            Sent::Success(ApiResponse {
                status: response.status,
                body,
            })
        } else if response.status == StatusCode::UNAUTHORIZED {
            Sent::Unauthorized(body)
        } else {
            Sent::Failed(response.status, body)
        })
    }

    /// Decrypt the body if possible, else parse it as JSON, else keep the
    /// raw string. Never fails.
    pub fn normalize_body(&self, raw: String) -> Value {
        if raw.is_empty() {
            return Value::String(raw);
        }
        match self.cipher.decrypt(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Response body is not an envelope, trying plain JSON");
                serde_json::from_str(&raw).unwrap_or(Value::String(raw))
            }
        }
    }
}
