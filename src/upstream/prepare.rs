//! Request preparation: endpoint and header-personality resolution, model
//! rewriting, and envelope assembly.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::json;
use url::Url;
use uuid::Uuid;

use castor_schema::{CloudCodeRequestMeta, Content, GeminiGenerateContentRequest, GenerationConfig};

use crate::config::{GatewayResolvedConfig, wire};
use crate::error::CastorError;
use crate::model::{self, HeaderStyle};

/// A fully prepared upstream request, ready for the fallback executor.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Initial endpoint base for this style.
    pub endpoint: Url,
    pub headers: HeaderMap,
    pub body: castor_schema::CloudCodeRequestBody,
    pub streaming: bool,
    pub requested_model: String,
    pub effective_model: String,
    pub project_id: String,
    pub style: HeaderStyle,
}

/// `{base}/v1internal:{action}[?alt=sse]`.
pub fn endpoint_url(base: &Url, streaming: bool) -> Url {
    let mut url = base.clone();
    if streaming {
        url.set_path("/v1internal:streamGenerateContent");
        url.set_query(Some("alt=sse"));
    } else {
        url.set_path("/v1internal:generateContent");
        url.set_query(None);
    }
    url
}

fn request_id() -> String {
    format!("agent-{}", Uuid::new_v4())
}

fn style_headers(style: HeaderStyle, access_token: &str, streaming: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}"))
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(if streaming {
            "text/event-stream"
        } else {
            "application/json"
        }),
    );

    let (user_agent, api_client, metadata) = match style {
        HeaderStyle::Antigravity => (
            wire::ANTIGRAVITY_USER_AGENT,
            wire::ANTIGRAVITY_API_CLIENT,
            wire::ANTIGRAVITY_CLIENT_METADATA,
        ),
        HeaderStyle::GeminiCli => (
            wire::GEMINI_CLI_USER_AGENT,
            wire::GEMINI_CLI_API_CLIENT,
            wire::GEMINI_CLI_CLIENT_METADATA,
        ),
    };
    headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert("X-Goog-Api-Client", HeaderValue::from_static(api_client));
    headers.insert("Client-Metadata", HeaderValue::from_static(metadata));
    headers
}

fn system_instruction_for(style: HeaderStyle, system_instruction: Option<&str>) -> Option<Content> {
    match style {
        // The antigravity personality always carries the identity preamble,
        // with the caller's instruction appended after a blank line, and an
        // explicit user role.
        HeaderStyle::Antigravity => {
            let text = match system_instruction {
                Some(extra) if !extra.is_empty() => {
                    format!("{}\n\n{extra}", wire::SYSTEM_INSTRUCTION_PREAMBLE)
                }
                _ => wire::SYSTEM_INSTRUCTION_PREAMBLE.to_string(),
            };
            Some(Content::text(Some("user".to_string()), text))
        }
        // The gemini-cli personality passes the caller's instruction through
        // untouched, with no role field.
        HeaderStyle::GeminiCli => system_instruction
            .filter(|s| !s.is_empty())
            .map(|s| Content::text(None, s)),
    }
}

/// Prepare one upstream request.
#[allow(clippy::too_many_arguments)]
pub fn prepare_request(
    cfg: &GatewayResolvedConfig,
    model: &str,
    contents: Vec<Content>,
    access_token: &str,
    project_id: Option<&str>,
    style: Option<HeaderStyle>,
    system_instruction: Option<&str>,
    generation_config: Option<GenerationConfig>,
    streaming: bool,
) -> Result<PreparedRequest, CastorError> {
    let clean = model::strip_style_marker(model);
    let (effective_model, thinking_level) = model::resolve_gemini3(clean);

    let project_id = project_id
        .filter(|p| !p.is_empty())
        .unwrap_or(wire::DEFAULT_PROJECT_ID)
        .to_string();
    let style = style.unwrap_or_else(|| model::style_of(model));

    let endpoint = match style {
        HeaderStyle::GeminiCli => cfg.endpoint_prod.clone(),
        HeaderStyle::Antigravity => cfg.endpoint_daily.clone(),
    };

    let mut generation_config = generation_config;
    if let Some(level) = &thinking_level {
        if effective_model.to_lowercase().contains("gemini-3") {
            let gc = generation_config.get_or_insert_with(GenerationConfig::default);
            *gc.thinking_config_mut() = Some(json!({
                "includeThoughts": true,
                "thinkingLevel": level,
            }));
        }
    }

    let mut request = GeminiGenerateContentRequest::new(contents);
    request.generation_config = generation_config;
    request.system_instruction = system_instruction_for(style, system_instruction);

    let body = CloudCodeRequestMeta {
        project: project_id.clone(),
        request_id: request_id(),
        model: effective_model.clone(),
    }
    .into_request(request);

    Ok(PreparedRequest {
        endpoint,
        headers: style_headers(style, access_token, streaming),
        body,
        streaming,
        requested_model: model.to_string(),
        effective_model,
        project_id,
        style,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_schema::Part;

    fn cfg() -> GatewayResolvedConfig {
        GatewayResolvedConfig::default()
    }

    fn user_turn(text: &str) -> Vec<Content> {
        vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
            extra: Default::default(),
        }]
    }

    #[test]
    fn url_construction_matches_wire_shape() {
        let base = Url::parse(wire::CLOUDCODE_ENDPOINT_PROD).unwrap();
        assert_eq!(
            endpoint_url(&base, true).as_str(),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            endpoint_url(&base, false).as_str(),
            "https://cloudcode-pa.googleapis.com/v1internal:generateContent"
        );
    }

    #[test]
    fn gemini_cli_request_targets_prod_without_preamble() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-2.5-pro",
            user_turn("hi"),
            "token-1",
            None,
            None,
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(prepared.style, HeaderStyle::GeminiCli);
        assert_eq!(prepared.endpoint.as_str().trim_end_matches('/'), wire::CLOUDCODE_ENDPOINT_PROD);
        assert!(prepared.body.request.system_instruction.is_none());
        assert_eq!(
            prepared.headers.get(USER_AGENT).unwrap(),
            wire::GEMINI_CLI_USER_AGENT
        );
        assert_eq!(
            prepared.headers.get(ACCEPT).unwrap(),
            "text/event-stream"
        );
        assert_eq!(prepared.effective_model, "gemini-2.5-pro");
    }

    #[test]
    fn gemini3_pro_is_rewritten_with_tier_and_thinking_config() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-3-pro",
            user_turn("hi"),
            "token-1",
            None,
            None,
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(prepared.style, HeaderStyle::Antigravity);
        assert_eq!(prepared.effective_model, "gemini-3-pro-low");
        assert_eq!(prepared.body.model, "gemini-3-pro-low");
        assert_eq!(prepared.endpoint.as_str().trim_end_matches('/'), wire::CLOUDCODE_ENDPOINT_DAILY);

        let thinking = prepared
            .body
            .request
            .generation_config
            .as_ref()
            .and_then(|gc| gc.thinking_config.as_ref())
            .unwrap();
        assert_eq!(thinking["includeThoughts"], true);
        assert_eq!(thinking["thinkingLevel"], "low");

        let si = prepared.body.request.system_instruction.as_ref().unwrap();
        assert_eq!(si.role.as_deref(), Some("user"));
        assert!(
            si.parts[0]
                .text
                .as_deref()
                .unwrap()
                .starts_with(wire::SYSTEM_INSTRUCTION_PREAMBLE)
        );

        assert_eq!(
            prepared.headers.get(USER_AGENT).unwrap(),
            wire::ANTIGRAVITY_USER_AGENT
        );
    }

    #[test]
    fn caller_system_prompt_is_appended_after_blank_line() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-3-flash",
            user_turn("hi"),
            "token-1",
            None,
            None,
            Some("Be terse."),
            None,
            false,
        )
        .unwrap();

        let text = prepared
            .body
            .request
            .system_instruction
            .as_ref()
            .and_then(|si| si.parts[0].text.as_deref())
            .unwrap();
        assert_eq!(
            text,
            format!("{}\n\nBe terse.", wire::SYSTEM_INSTRUCTION_PREAMBLE)
        );
    }

    #[test]
    fn gemini_cli_system_prompt_has_no_role() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-2.5-pro",
            user_turn("hi"),
            "token-1",
            None,
            None,
            Some("Be terse."),
            None,
            false,
        )
        .unwrap();

        let si = prepared.body.request.system_instruction.as_ref().unwrap();
        assert!(si.role.is_none());
        assert_eq!(si.parts[0].text.as_deref(), Some("Be terse."));
    }

    #[test]
    fn envelope_carries_fixed_fields_and_request_id() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-3-pro:antigravity",
            user_turn("hi"),
            "token-1",
            Some("proj-7"),
            None,
            None,
            None,
            true,
        )
        .unwrap();

        assert_eq!(prepared.body.user_agent, "antigravity");
        assert_eq!(prepared.body.request_type, "agent");
        assert_eq!(prepared.body.project, "proj-7");
        assert!(prepared.body.request_id.starts_with("agent-"));
        // The marker is stripped before normalization.
        assert_eq!(prepared.effective_model, "gemini-3-pro-low");
    }

    #[test]
    fn missing_project_falls_back_to_default() {
        let prepared = prepare_request(
            &cfg(),
            "gemini-2.5-pro",
            user_turn("hi"),
            "token-1",
            None,
            None,
            None,
            None,
            true,
        )
        .unwrap();
        assert_eq!(prepared.project_id, wire::DEFAULT_PROJECT_ID);
    }
}
