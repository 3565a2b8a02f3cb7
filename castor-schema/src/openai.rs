//! OpenAI chat-completions wire shapes served by the gateway facade.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
}

impl ChatCompletionResponse {
    pub fn of_text(id: String, created: i64, model: String, text: String) -> Self {
        ChatCompletionResponse {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: text,
                },
                finish_reason: Some("stop".to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatCompletionChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunkChoice {
    pub index: u32,
    pub delta: ChatCompletionChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn of_content(id: String, created: i64, model: String, content: String) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionChunkDelta {
                    role: None,
                    content: Some(content),
                },
                finish_reason: None,
            },
        )
    }

    pub fn finish(id: String, created: i64, model: String) -> Self {
        Self::with_choice(
            id,
            created,
            model,
            ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionChunkDelta::default(),
                finish_reason: Some("stop".to_string()),
            },
        )
    }

    fn with_choice(
        id: String,
        created: i64,
        model: String,
        choice: ChatCompletionChunkChoice,
    ) -> Self {
        ChatCompletionChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices: vec![choice],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    pub fn from_model_names<I, S>(models: I, owned_by: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let data = models
            .into_iter()
            .map(|model| Model {
                id: model.into(),
                object: "model".to_string(),
                created: 0,
                owned_by: owned_by.to_string(),
            })
            .collect();

        ModelList {
            object: "list".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunk_serializes_openai_shape() {
        let chunk = ChatCompletionChunk::of_content(
            "chatcmpl-1".to_string(),
            0,
            "gemini-3-flash".to_string(),
            "hi".to_string(),
        );

        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 0,
                "model": "gemini-3-flash",
                "choices": [{
                    "index": 0,
                    "delta": {"content": "hi"},
                    "finish_reason": null
                }]
            })
        );
    }

    #[test]
    fn request_defaults_stream_off() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-3-pro",
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .unwrap();
        assert!(!req.stream);
        assert!(req.temperature.is_none());
    }
}
