//! OpenAI-compatible chat-completions facade over the dispatch engine.

use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tokio_stream::StreamExt as _;
use tracing::{error, warn};
use uuid::Uuid;

use castor_schema::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ModelList,
};

use crate::error::CastorError;
use crate::server::router::CastorState;
use crate::service::translate_messages;

/// Models the gateway advertises. The upstream serves more; these are the
/// ones with stable quota behavior.
const ADVERTISED_MODELS: &[&str] = &[
    "gemini-3-pro",
    "gemini-3-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "claude-sonnet-4-5",
    "claude-opus-4-5",
];

const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn models_handler() -> Json<ModelList> {
    Json(ModelList::from_model_names(
        ADVERTISED_MODELS.iter().copied(),
        "castor",
    ))
}

pub async fn chat_completions_handler(
    State(state): State<CastorState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, CastorError> {
    let (contents, system_prompt) = translate_messages(&request.messages);
    if contents.is_empty() {
        return Err(CastorError::Unexpected(
            "request carries no user or assistant messages".to_string(),
        ));
    }

    let generation_config = generation_config_of(&request);
    let completion_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    if request.stream {
        let chunks = state
            .gateway
            .generate_stream(
                &request.model,
                contents,
                system_prompt.as_deref(),
                generation_config,
            )
            .await?;

        let model = request.model.clone();
        let id = completion_id.clone();

        let body_stream = chunks
            .map(move |item| match item {
                Ok(text) => sse_json(&ChatCompletionChunk::of_content(
                    id.clone(),
                    created,
                    model.clone(),
                    text,
                )),
                Err(err) => {
                    warn!("stream failed mid-flight: {err}");
                    Ok(Event::default().data(
                        json!({ "error": { "message": err.to_string(), "type": "upstream_error" } })
                            .to_string(),
                    ))
                }
            })
            .chain(futures::stream::iter(vec![
                sse_json(&ChatCompletionChunk::finish(
                    completion_id,
                    created,
                    request.model.clone(),
                )),
                Ok(Event::default().data("[DONE]")),
            ]))
            .timeout(STREAM_IDLE_TIMEOUT)
            .map(|item| match item {
                Ok(event) => event,
                Err(_) => {
                    error!("upstream SSE stream timed out (idle > 60s)");
                    Ok(Event::default().data(
                        json!({ "error": { "message": "stream idle timeout", "type": "upstream_error" } })
                            .to_string(),
                    ))
                }
            });

        Ok(Sse::new(body_stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let text = state
            .gateway
            .generate(
                &request.model,
                contents,
                system_prompt.as_deref(),
                generation_config,
            )
            .await?;

        Ok(Json(ChatCompletionResponse::of_text(
            completion_id,
            created,
            request.model,
            text,
        ))
        .into_response())
    }
}

fn sse_json<T: serde::Serialize>(payload: &T) -> Result<Event, std::convert::Infallible> {
    match Event::default().json_data(payload) {
        Ok(event) => Ok(event),
        Err(err) => {
            warn!("failed to serialize SSE chunk: {err}");
            Ok(Event::default().data("{}"))
        }
    }
}

fn generation_config_of(
    request: &ChatCompletionRequest,
) -> Option<castor_schema::GenerationConfig> {
    if request.temperature.is_none() && request.max_tokens.is_none() {
        return None;
    }
    Some(castor_schema::GenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        ..Default::default()
    })
}
