use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::Content;

/// One generated candidate inside a generate-content response or stream event.
///
/// The upstream payload is schema-lax; everything is optional and unknown
/// fields are preserved in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Candidate {
    /// Concatenated model-visible text of this candidate (thought parts
    /// filtered out).
    pub fn visible_text(&self) -> String {
        let Some(content) = &self.content else {
            return String::new();
        };
        content
            .parts
            .iter()
            .filter_map(super::Part::visible_text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visible_text_filters_thought_parts() {
        let candidate: Candidate = serde_json::from_value(json!({
            "content": {
                "role": "model",
                "parts": [
                    {"text": "a"},
                    {"thought": "z"},
                    {"text": "b", "thought": "y"},
                    {"text": "c"}
                ]
            }
        }))
        .unwrap();

        assert_eq!(candidate.visible_text(), "ac");
    }

    #[test]
    fn empty_candidate_yields_empty_text() {
        let candidate: Candidate = serde_json::from_value(json!({})).unwrap();
        assert_eq!(candidate.visible_text(), "");
    }
}
