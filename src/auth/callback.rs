//! One-shot localhost listener for the OAuth redirect.

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use crate::error::CastorError;

const CALLBACK_PATH: &str = "/oauth-callback";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Castor Auth</title>
<style>
body { font-family: monospace; display: flex; justify-content: center;
       align-items: center; height: 100vh; margin: 0; background: #0a0a0f; }
.container { text-align: center; padding: 50px 70px; border: 1px solid #00ff88;
             border-radius: 4px; color: #00ff88; }
p { color: #666; }
</style></head>
<body><div class="container">
<h1>Access granted</h1>
<p>You may close this window and return to the terminal.</p>
</div></body>
</html>
"#;

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<(String, String)>>>>;

async fn callback_handler(
    State(tx): State<CallbackSender>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    let (Some(code), Some(state)) = (query.code, query.state) else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    if let Ok(mut guard) = tx.lock() {
        if let Some(tx) = guard.take() {
            let _ = tx.send((code, state));
        }
    }
    Html(SUCCESS_HTML).into_response()
}

/// Serve the redirect endpoint on the fixed localhost port and wait for a
/// single `(code, state)` callback. Times out after five minutes.
pub async fn wait_for_callback(port: u16) -> Result<(String, String), CastorError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).await.map_err(|err| {
        CastorError::Unexpected(format!(
            "could not bind the OAuth callback listener on {addr}: {err}"
        ))
    })?;

    let (tx, rx) = oneshot::channel();
    let sender: CallbackSender = Arc::new(Mutex::new(Some(tx)));

    let app = Router::new()
        .route(CALLBACK_PATH, get(callback_handler))
        .with_state(sender);

    info!(%addr, "waiting for OAuth callback");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let result = tokio::time::timeout(CALLBACK_TIMEOUT, rx).await;
    server.abort();

    match result {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(_)) => Err(CastorError::Unexpected(
            "OAuth callback listener closed unexpectedly".to_string(),
        )),
        Err(_) => Err(CastorError::Unexpected(
            "timed out waiting for the OAuth callback".to_string(),
        )),
    }
}
