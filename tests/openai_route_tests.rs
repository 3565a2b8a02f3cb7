//! OpenAI facade routing, auth guard, and response framing.

use axum::{Router, http::StatusCode, response::IntoResponse, routing::post};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

use castor::config::GatewayResolvedConfig;
use castor::server::router::{CastorState, castor_router};
use castor::storage::AccountStore;
use castor::Gateway;

const SSE: &str = concat!(
    "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello \"}]}}]}\n\n",
    "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"world\"}]}}]}\n\n",
    "data: [DONE]\n\n",
);

async fn spawn_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}")).expect("valid base url")
}

async fn spawn_mock_upstream() -> Url {
    let app = Router::new().route(
        "/v1internal:streamGenerateContent",
        post(|| async {
            (
                StatusCode::OK,
                [("content-type", "text/event-stream")],
                SSE.to_string(),
            )
                .into_response()
        }),
    );
    spawn_server(app).await
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

async fn spawn_gateway_server() -> (Url, TempDir) {
    let upstream = spawn_mock_upstream().await;
    let token = spawn_token_endpoint().await;

    let cfg = GatewayResolvedConfig {
        endpoint_daily: upstream.clone(),
        endpoint_autopush: upstream.clone(),
        endpoint_prod: upstream,
        oauth_token_url: token.join("/token").unwrap(),
        ..GatewayResolvedConfig::default()
    };

    let dir = TempDir::new().expect("tempdir");
    let store = AccountStore::at(dir.path().join("accounts.json"));
    store
        .add_or_update(Some("a@example.com"), "rt-a", Some("proj-a"), None)
        .expect("seed account");

    let gateway = Arc::new(Gateway::load(cfg, store));
    let state = CastorState::new(gateway, Arc::from("test-key"));
    (spawn_server(castor_router(state)).await, dir)
}

#[tokio::test]
async fn health_is_open_but_v1_requires_a_key() {
    let (base, _dir) = spawn_gateway_server().await;
    let http = reqwest::Client::new();

    let health = http.get(base.join("/health").unwrap()).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let denied = http.get(base.join("/v1/models").unwrap()).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let wrong = http
        .get(base.join("/v1/models").unwrap())
        .bearer_auth("wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let allowed = http
        .get(base.join("/v1/models").unwrap())
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let body: Value = allowed.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert!(body["data"].as_array().unwrap().iter().any(|m| m["id"] == "gemini-3-pro"));
}

#[tokio::test]
async fn query_key_is_accepted_as_alternate_credential() {
    let (base, _dir) = spawn_gateway_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(base.join("/v1/models?key=test-key").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_completion_returns_assembled_text() {
    let (base, _dir) = spawn_gateway_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(base.join("/v1/chat/completions").unwrap())
        .bearer_auth("test-key")
        .json(&json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gemini-2.5-pro");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello world");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn streamed_chat_completion_frames_chunks_and_done() {
    let (base, _dir) = spawn_gateway_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(base.join("/v1/chat/completions").unwrap())
        .bearer_auth("test-key")
        .json(&json!({
            "model": "gemini-2.5-pro",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let raw = resp.text().await.unwrap();
    let payloads: Vec<&str> = raw
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();

    assert_eq!(*payloads.last().unwrap(), "[DONE]");

    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();

    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "Hello world");

    let finish = chunks.last().unwrap();
    assert_eq!(finish["object"], "chat.completion.chunk");
    assert_eq!(finish["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn empty_message_list_is_rejected() {
    let (base, _dir) = spawn_gateway_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(base.join("/v1/chat/completions").unwrap())
        .bearer_auth("test-key")
        .json(&json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "system", "content": "only system"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
