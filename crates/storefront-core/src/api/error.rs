use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::transport::TransportError;
use crate::auth::RefreshError;
use crate::utils::truncate_string;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session expired - please log in again")]
    AuthExpired,

    #[error("Token refresh failed: {0}")]
    Refresh(RefreshError),

    #[error("Unauthorized after token refresh - session ended")]
    UnauthorizedRetryExhausted { body: Value },

    #[error("Request failed with status {status}: {}", body_preview(.body))]
    Status { status: StatusCode, body: Value },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode request body: {0}")]
    Serialize(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::MissingRefreshToken => ApiError::AuthExpired,
            other => ApiError::Refresh(other),
        }
    }
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: Value) -> Self {
        ApiError::Status { status, body }
    }

    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::UnauthorizedRetryExhausted { .. } => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// True for failures that ended the session; callers should send the
    /// user back to the login prompt
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            ApiError::AuthExpired | ApiError::Refresh(_) | ApiError::UnauthorizedRetryExhausted { .. }
        )
    }

    /// Server-provided `message` field, for user-facing display
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { body, .. } | ApiError::UnauthorizedRetryExhausted { body } => {
                body.get("message").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}

fn body_preview(body: &Value) -> String {
    match body {
        Value::String(s) => truncate_string(s, MAX_ERROR_BODY_LENGTH),
        other => truncate_string(&other.to_string(), MAX_ERROR_BODY_LENGTH),
    }
}
