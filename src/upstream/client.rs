//! Upstream executor with endpoint fallback.
//!
//! Transport and server errors walk the endpoint chain; a 429 short-circuits
//! immediately (rate limits are per-identity, not per-endpoint); success and
//! other client errors return as-is.

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use castor_schema::CloudCodeResponseBody;

use crate::config::GatewayResolvedConfig;
use crate::error::CastorError;

use super::decode::{collect_sse_events, parse_retry_after};
use super::prepare::{PreparedRequest, endpoint_url};

pub(crate) const UPSTREAM_BODY_PREVIEW_CHARS: usize = 300;

const FALLBACK_STATUSES: &[u16] = &[403, 404, 500, 502, 503, 504];

/// Decoded body of a successful exchange.
#[derive(Debug)]
pub enum UpstreamBody {
    /// Buffered SSE events (collect-mode streaming).
    Events(Vec<CloudCodeResponseBody>),
    /// Plain JSON document (non-streaming).
    Document(Box<CloudCodeResponseBody>),
}

impl UpstreamBody {
    pub fn extract_text(&self) -> String {
        match self {
            UpstreamBody::Events(events) => super::decode::extract_text(events),
            // A JSON document carries one response; only the first candidate
            // is surfaced.
            UpstreamBody::Document(doc) => doc
                .candidates()
                .first()
                .map(castor_schema::Candidate::visible_text)
                .unwrap_or_default(),
        }
    }
}

/// Outcome of one buffered execution across the endpoint chain.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Success {
        status: StatusCode,
        body: UpstreamBody,
    },
    RateLimited {
        retry_after_ms: Option<u64>,
    },
    /// Non-retriable upstream status (4xx outside the fallback set).
    Failed {
        status: StatusCode,
        message: String,
    },
}

/// Outcome of opening a live stream.
pub enum StreamStart {
    Live(reqwest::Response),
    RateLimited { retry_after_ms: Option<u64> },
}

pub struct CloudCodeClient {
    http: reqwest::Client,
    fallbacks: Vec<Url>,
}

impl CloudCodeClient {
    pub fn new(cfg: &GatewayResolvedConfig, http: reqwest::Client) -> Self {
        CloudCodeClient {
            http,
            fallbacks: vec![
                cfg.endpoint_daily.clone(),
                cfg.endpoint_autopush.clone(),
                cfg.endpoint_prod.clone(),
            ],
        }
    }

    /// The prepared request's own endpoint first, then the remaining chain.
    fn endpoint_chain(&self, prepared: &PreparedRequest) -> Vec<Url> {
        let mut chain = vec![prepared.endpoint.clone()];
        chain.extend(
            self.fallbacks
                .iter()
                .filter(|base| **base != prepared.endpoint)
                .cloned(),
        );
        chain
    }

    async fn send(
        &self,
        base: &Url,
        prepared: &PreparedRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = endpoint_url(base, prepared.streaming);
        self.http
            .post(url)
            .headers(prepared.headers.clone())
            .json(&prepared.body)
            .send()
            .await
    }

    /// Execute with buffered decoding (non-streaming or collect-mode SSE).
    pub async fn execute(&self, prepared: &PreparedRequest) -> Result<ExecuteOutcome, CastorError> {
        let mut last_error = String::new();

        for base in self.endpoint_chain(prepared) {
            let resp = match self.send(&base, prepared).await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(endpoint = %base, model = %prepared.effective_model,
                          "upstream transport error: {err}");
                    last_error = err.to_string();
                    continue;
                }
            };

            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Ok(ExecuteOutcome::RateLimited {
                    retry_after_ms: retry_after_of(resp).await,
                });
            }

            if FALLBACK_STATUSES.contains(&status.as_u16()) {
                let preview = body_preview(resp).await;
                debug!(endpoint = %base, %status, body = %preview,
                       "upstream error, trying next endpoint");
                last_error = format!("HTTP {status}");
                continue;
            }

            if !status.is_success() {
                let message = body_preview(resp).await;
                return Ok(ExecuteOutcome::Failed { status, message });
            }

            let body = if prepared.streaming {
                UpstreamBody::Events(collect_sse_events(&resp.text().await?))
            } else {
                UpstreamBody::Document(Box::new(resp.json::<CloudCodeResponseBody>().await?))
            };
            return Ok(ExecuteOutcome::Success { status, body });
        }

        Err(CastorError::Transport(if last_error.is_empty() {
            "all endpoints failed".to_string()
        } else {
            last_error
        }))
    }

    /// Open a live stream. Fallback behavior matches [`Self::execute`] up to
    /// the first byte; the undecoded response is handed back on success.
    pub async fn execute_streaming(
        &self,
        prepared: &PreparedRequest,
    ) -> Result<StreamStart, CastorError> {
        let mut last_error = String::new();

        for base in self.endpoint_chain(prepared) {
            let resp = match self.send(&base, prepared).await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(endpoint = %base, model = %prepared.effective_model,
                          "upstream transport error: {err}");
                    last_error = err.to_string();
                    continue;
                }
            };

            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Ok(StreamStart::RateLimited {
                    retry_after_ms: retry_after_of(resp).await,
                });
            }

            if FALLBACK_STATUSES.contains(&status.as_u16()) {
                let preview = body_preview(resp).await;
                debug!(endpoint = %base, %status, body = %preview,
                       "upstream error, trying next endpoint");
                last_error = format!("HTTP {status}");
                continue;
            }

            if !status.is_success() {
                let message = body_preview(resp).await;
                return Err(CastorError::Upstream { status, message });
            }

            return Ok(StreamStart::Live(resp));
        }

        Err(CastorError::Transport(if last_error.is_empty() {
            "all endpoints failed".to_string()
        } else {
            last_error
        }))
    }
}

async fn retry_after_of(resp: reqwest::Response) -> Option<u64> {
    let headers = resp.headers().clone();
    let body = resp
        .text()
        .await
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok());
    parse_retry_after(&headers, body.as_ref())
}

async fn body_preview(resp: reqwest::Response) -> String {
    match resp.text().await {
        Ok(text) => {
            let mut preview: String = text.chars().take(UPSTREAM_BODY_PREVIEW_CHARS).collect();
            if preview.len() < text.len() {
                preview.push_str("...");
            }
            preview
        }
        Err(err) => format!("<failed to read body: {err}>"),
    }
}
