//! Live-streaming dispatch against mock upstreams.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

use castor::config::GatewayResolvedConfig;
use castor::storage::AccountStore;
use castor::{CastorError, Gateway};
use castor_schema::Content;

const STREAM_SSE: &str = concat!(
    "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"chunk one \"}]}}]}\n\n",
    "data: {\"candidates\":[{\"content\":{\"parts\":[{\"thought\":true,\"text\":\"hidden\"}]}}]}\n\n",
    "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"chunk two\"}]}}]}\n\n",
    "data: [DONE]\n\n",
);

#[derive(Clone)]
struct MockUpstream {
    calls: Arc<AtomicUsize>,
    rate_limit_first: bool,
}

async fn upstream_handler(State(state): State<MockUpstream>) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    if state.rate_limit_first && call == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after-ms", "90000")],
            json!({"error": {"status": "RESOURCE_EXHAUSTED"}}).to_string(),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/event-stream")],
        STREAM_SSE.to_string(),
    )
        .into_response()
}

async fn spawn_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}")).expect("valid base url")
}

async fn spawn_upstream(rate_limit_first: bool) -> (Url, MockUpstream) {
    let state = MockUpstream {
        calls: Arc::new(AtomicUsize::new(0)),
        rate_limit_first,
    };
    let app = Router::new()
        .route("/v1internal:streamGenerateContent", post(upstream_handler))
        .with_state(state.clone());
    (spawn_server(app).await, state)
}

async fn spawn_token_endpoint() -> Url {
    let app = Router::new().route(
        "/token",
        post(|| async {
            axum::Json(json!({
                "access_token": "access-1",
                "token_type": "Bearer",
                "expires_in": 3600
            }))
        }),
    );
    spawn_server(app).await
}

async fn gateway_with(
    daily: Url,
    prod: Url,
    token: Url,
) -> (Gateway, AccountStore, TempDir) {
    let cfg = GatewayResolvedConfig {
        endpoint_daily: daily,
        endpoint_autopush: prod.clone(),
        endpoint_prod: prod,
        oauth_token_url: token.join("/token").unwrap(),
        ..GatewayResolvedConfig::default()
    };

    let dir = TempDir::new().expect("tempdir");
    let store = AccountStore::at(dir.path().join("accounts.json"));
    store
        .add_or_update(Some("a@example.com"), "rt-a", Some("proj-a"), None)
        .expect("seed account");

    (Gateway::load(cfg, store.clone()), store, dir)
}

fn user_turn(text: &str) -> Vec<Content> {
    vec![Content::text(Some("user".to_string()), text)]
}

#[tokio::test]
async fn live_stream_yields_filtered_chunks_in_order() {
    let (daily, _) = spawn_upstream(false).await;
    let (prod, _) = spawn_upstream(false).await;
    let token = spawn_token_endpoint().await;
    let (gateway, _store, _dir) = gateway_with(daily, prod, token).await;

    let stream = gateway
        .generate_stream("gemini-3-pro", user_turn("hi"), None, None)
        .await
        .expect("stream should open");

    let chunks: Vec<String> = stream
        .map(|item| item.expect("no mid-stream errors"))
        .collect()
        .await;
    assert_eq!(chunks, vec!["chunk one ".to_string(), "chunk two".to_string()]);
}

#[tokio::test]
async fn pre_stream_rate_limit_falls_back_to_other_quota() {
    // The daily (antigravity) upstream rejects the first call; the fallback
    // quota streams from prod on the same identity.
    let (daily, daily_state) = spawn_upstream(true).await;
    let (prod, prod_state) = spawn_upstream(false).await;
    let token = spawn_token_endpoint().await;
    let (gateway, _store, _dir) = gateway_with(daily, prod, token).await;

    let stream = gateway
        .generate_stream("gemini-3-pro", user_turn("hi"), None, None)
        .await
        .expect("fallback quota should open the stream");

    let chunks: Vec<String> = stream.map(|item| item.expect("no errors")).collect().await;
    assert_eq!(chunks.concat(), "chunk one chunk two");

    assert_eq!(daily_state.calls.load(Ordering::SeqCst), 1);
    assert_eq!(prod_state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stream_failure_before_open_surfaces_error() {
    // Every endpoint rejects with a non-fallback status.
    let app = Router::new().route(
        "/v1internal:streamGenerateContent",
        post(|| async { (StatusCode::BAD_REQUEST, "malformed") }),
    );
    let bad = spawn_server(app).await;
    let token = spawn_token_endpoint().await;
    let (gateway, _store, _dir) = gateway_with(bad.clone(), bad, token).await;

    let err = match gateway
        .generate_stream("gemini-3-pro", user_turn("hi"), None, None)
        .await
    {
        Err(err) => err,
        Ok(_) => panic!("stream must not open"),
    };
    match err {
        CastorError::Upstream { status, .. } => assert_eq!(status, StatusCode::BAD_REQUEST),
        other => panic!("expected Upstream, got {other:?}"),
    }
}
