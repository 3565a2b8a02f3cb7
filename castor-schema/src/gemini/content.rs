use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single conversation turn or system instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    /// Usually `"user"` or `"model"`. Kept as a raw string for transparent
    /// pass-through; `systemInstruction` may carry `"user"` or nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Ordered parts that constitute a single message.
    pub parts: Vec<Part>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Content {
    /// A single-text turn, the common case for prompts and instructions.
    pub fn text(role: impl Into<Option<String>>, text: impl Into<String>) -> Self {
        Content {
            role: role.into(),
            parts: vec![Part::text(text)],
            extra: BTreeMap::new(),
        }
    }
}

/// One atomic piece of content inside a `Content` turn.
///
/// `text` is the most common variant. The `thought` marker is deliberately kept
/// as a raw `Value`: the upstream emits it both as a boolean flag and as inline
/// thought text, and the extraction rules only care about key presence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Model-thought marker. A part carrying this key is never model-visible
    /// text, regardless of what else it carries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<Value>,

    /// Opaque reusable thought signature (base64 string).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,

    /// Inline text data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Value>,

    /// Function call produced by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,

    /// Function response used as context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            ..Part::default()
        }
    }

    /// Model-visible text: the `text` field of parts that carry no `thought`
    /// marker.
    pub fn visible_text(&self) -> Option<&str> {
        if self.thought.is_some() {
            return None;
        }
        self.text.as_deref()
    }
}
