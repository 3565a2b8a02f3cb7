use axum::{
    Router,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::server::guards::auth::RequireKeyAuth;
use crate::server::routes::openai::{chat_completions_handler, health_handler, models_handler};
use crate::service::Gateway;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const REQUEST_ID_MAX_LEN: usize = 64;

#[derive(Clone)]
pub struct CastorState {
    pub gateway: Arc<Gateway>,
    pub castor_key: Arc<str>,
}

impl CastorState {
    pub fn new(gateway: Arc<Gateway>, castor_key: Arc<str>) -> Self {
        Self {
            gateway,
            castor_key,
        }
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// A caller-supplied request id is reused when sane; otherwise one is minted.
fn request_id_of(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= REQUEST_ID_MAX_LEN)
        .map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string)
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = request_id_of(req.headers());

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Reflect `x-request-id` for correlation, even if the client sent none.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    // For SSE responses this is time-to-first-byte, not stream duration.
    if resp.status().is_server_error() {
        error!(
            req.id = %request_id,
            req.method = %method,
            req.path = %path,
            resp.status = status,
            resp.latency_ms = latency_ms,
            "request failed"
        );
    } else if resp.status().is_client_error() {
        warn!(
            req.id = %request_id,
            req.method = %method,
            req.path = %path,
            resp.status = status,
            resp.latency_ms = latency_ms,
            "request rejected"
        );
    } else {
        info!(
            req.id = %request_id,
            req.method = %method,
            req.path = %path,
            resp.status = status,
            resp.latency_ms = latency_ms,
            "request served"
        );
    }

    resp
}

pub fn castor_router(state: CastorState) -> Router {
    let v1 = Router::new()
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .layer(middleware::from_extractor_with_state::<RequireKeyAuth, _>(
            state.clone(),
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(v1)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
