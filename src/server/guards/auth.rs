//! Inbound key authentication for the `/v1` surface.
//!
//! Callers may present the gateway key as `Authorization: Bearer`, as an
//! `x-goog-api-key` header, or as a `?key=` query parameter. Comparison is
//! constant-time.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::error::{ApiErrorBody, ApiErrorObject};
use crate::server::router::CastorState;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// First credential found, in header-then-query order.
fn presented_key(parts: &Parts) -> Option<String> {
    let headers = &parts.headers;

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    parts.uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value.into_owned())
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<CastorState> for RequireKeyAuth {
    type Rejection = Unauthorized;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CastorState,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = presented_key(parts) else {
            return Err(Unauthorized("missing API key"));
        };

        let expected = state.castor_key.as_ref();
        if bool::from(key.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(RequireKeyAuth)
        } else {
            Err(Unauthorized("invalid API key"))
        }
    }
}

/// 401 rejection in the facade's OpenAI-style error shape.
pub struct Unauthorized(&'static str);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            inner: ApiErrorObject {
                message: self.0.to_string(),
                kind: "unauthorized".to_string(),
                retry_after_ms: None,
            },
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
