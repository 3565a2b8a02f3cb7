use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

#[derive(Debug, ThisError)]
pub enum CastorError {
    /// The identity pool is empty.
    #[error("no identities configured; run `castor login` to add one")]
    NoIdentities,

    /// Every identity is rate-limited or cooling down. `wait_ms` is the
    /// minimum wait until some quota resets.
    #[error("all identities rate-limited; retry in {}s", wait_ms / 1000)]
    AllRateLimited { wait_ms: u64 },

    /// A refresh token came back `invalid_grant`. The identity has already
    /// been removed and the pool persisted.
    #[error("token revoked for {}; please re-login", email.as_deref().unwrap_or("<unknown>"))]
    TokenRevoked { email: Option<String> },

    /// Non-retriable upstream failure, or retries exhausted.
    #[error("upstream error {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    /// Local/network failure after endpoint fallback was exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Standardized OpenAI-style error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

impl IntoResponse for CastorError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            CastorError::NoIdentities => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorObject {
                    message: self.to_string(),
                    kind: "no_identities".to_string(),
                    retry_after_ms: None,
                },
            ),

            CastorError::AllRateLimited { wait_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiErrorObject {
                    message: self.to_string(),
                    kind: "rate_limit_exceeded".to_string(),
                    retry_after_ms: Some(*wait_ms),
                },
            ),

            CastorError::TokenRevoked { .. } => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    message: self.to_string(),
                    kind: "token_revoked".to_string(),
                    retry_after_ms: None,
                },
            ),

            CastorError::Upstream { status, .. } => (
                *status,
                ApiErrorObject {
                    message: self.to_string(),
                    kind: "upstream_error".to_string(),
                    retry_after_ms: None,
                },
            ),

            CastorError::Transport(_)
            | CastorError::Reqwest(_)
            | CastorError::StreamProtocol(_)
            | CastorError::Oauth(_) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorObject {
                    message: "Upstream service error.".to_string(),
                    kind: "upstream_error".to_string(),
                    retry_after_ms: None,
                },
            ),

            CastorError::Json(_)
            | CastorError::Io(_)
            | CastorError::Url(_)
            | CastorError::Unexpected(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorObject {
                    message: "An internal server error occurred.".to_string(),
                    kind: "internal_error".to_string(),
                    retry_after_ms: None,
                },
            ),
        };

        (status, Json(ApiErrorBody { inner: body })).into_response()
    }
}

impl IsRetryable for CastorError {
    fn is_retryable(&self) -> bool {
        match self {
            CastorError::Reqwest(_) | CastorError::Transport(_) => true,
            CastorError::Upstream { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}
