use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `generationConfig` object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Keep `thinkingConfig` as raw value for transparent pass-through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GenerationConfig {
    /// Mutable access to `generationConfig.thinkingConfig`.
    pub fn thinking_config_mut(&mut self) -> &mut Option<Value> {
        &mut self.thinking_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_captures_unknown_fields() {
        let input = json!({
            "temperature": 1.0,
            "candidateCount": 2,
            "responseModalities": ["TEXT"],
            "thinkingConfig": {
                "includeThoughts": true,
                "thinkingLevel": "low"
            }
        });

        let gc: GenerationConfig = serde_json::from_value(input).unwrap();
        assert_eq!(gc.temperature, Some(1.0));
        assert_eq!(gc.extra.get("candidateCount"), Some(&json!(2)));
        assert_eq!(gc.extra.get("responseModalities"), Some(&json!(["TEXT"])));
        assert_eq!(
            gc.thinking_config,
            Some(json!({
                "includeThoughts": true,
                "thinkingLevel": "low"
            }))
        );
    }

    #[test]
    fn thinking_config_roundtrips_as_raw_value() {
        let input = json!({
            "thinkingConfig": {
                "thinkingLevel": "high",
                "someVendorField": 1
            }
        });

        let gc: GenerationConfig = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&gc).unwrap(), input);
    }
}
