//! Typed schema for the CloudCode upstream envelope.
//!
//! CloudCode wraps Gemini's generate-content request in an outer payload and
//! returns events that nest the Gemini response under `response` (streaming)
//! or at the top level (non-streaming).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gemini::{Candidate, GeminiGenerateContentRequest};

/// Runtime metadata needed to wrap a Gemini request into the CloudCode
/// upstream envelope.
#[derive(Debug, Clone)]
pub struct CloudCodeRequestMeta {
    pub project: String,
    pub request_id: String,
    pub model: String,
}

impl CloudCodeRequestMeta {
    /// Build the upstream envelope from runtime metadata and a typed Gemini
    /// `generateContent` request body.
    pub fn into_request(self, request: GeminiGenerateContentRequest) -> CloudCodeRequestBody {
        CloudCodeRequestBody {
            project: self.project,
            model: self.model,
            request,
            request_type: CloudCodeRequestBody::REQUEST_TYPE.to_string(),
            user_agent: CloudCodeRequestBody::USER_AGENT.to_string(),
            request_id: self.request_id,
        }
    }
}

/// CloudCode upstream request envelope. All fields are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudCodeRequestBody {
    pub project: String,
    pub model: String,
    pub request: GeminiGenerateContentRequest,
    pub request_type: String,
    pub user_agent: String,
    pub request_id: String,
}

impl CloudCodeRequestBody {
    pub const USER_AGENT: &str = "antigravity";
    pub const REQUEST_TYPE: &str = "agent";
}

/// One CloudCode response document or stream event.
///
/// The payload is schema-lax: candidates appear either at the top level or
/// nested under `response`. Unknown fields are preserved, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudCodeResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<InnerResponse>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InnerResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CloudCodeResponseBody {
    /// Candidates of this event, wherever the upstream put them.
    pub fn candidates(&self) -> &[Candidate] {
        if let Some(inner) = &self.response {
            if !inner.candidates.is_empty() {
                return &inner.candidates;
            }
        }
        &self.candidates
    }

    /// Concatenated model-visible text across all candidates of this event.
    pub fn visible_text(&self) -> String {
        self.candidates()
            .iter()
            .map(Candidate::visible_text)
            .collect()
    }
}
