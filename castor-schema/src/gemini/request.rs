use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Content, GenerationConfig};

/// Gemini `generateContent` / `streamGenerateContent` request body.
///
/// Reference: <https://ai.google.dev/gemini-api/docs/text-generation>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerateContentRequest {
    /// Required conversation turns.
    pub contents: Vec<Content>,

    /// System-level instruction. Structured identically to a `Content`; the
    /// upstream expects `role: "user"` here for one header style and no role
    /// for the other.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Generation parameters (temperature, topP, maxOutputTokens, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// Catch-all for future/optional unknown fields, including `tools`,
    /// `toolConfig`, `safetySettings` and `cachedContent`.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GeminiGenerateContentRequest {
    pub fn new(contents: Vec<Content>) -> Self {
        GeminiGenerateContentRequest {
            contents,
            system_instruction: None,
            generation_config: None,
            extra: BTreeMap::new(),
        }
    }
}
