use serde::{Deserialize, Serialize};
use url::Url;

use super::wire;

/// Gateway (dispatch engine) configuration managed by Figment.
///
/// Wire-contract values (endpoints, OAuth client pair, header triples) are
/// intentionally fixed to built-in defaults and not configurable via
/// `config.toml`; tests override them by constructing
/// [`GatewayResolvedConfig`] directly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Fail with `AllRateLimited` instead of sleeping when every identity is
    /// further than this from its soonest reset. `0` disables the cap.
    /// TOML: `gateway.max_rate_limit_wait_seconds`. Default: `300`.
    #[serde(default = "default_max_rate_limit_wait_seconds")]
    pub max_rate_limit_wait_seconds: u64,

    /// Within one Gemini identity, fall back from the `antigravity` quota to
    /// the `gemini-cli` quota after a 429.
    /// TOML: `gateway.quota_fallback`. Default: `true`.
    #[serde(default = "default_quota_fallback")]
    pub quota_fallback: bool,

    /// Identity rotation retries per request.
    /// TOML: `gateway.max_retries`. Default: `3`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Suppress informational rotation/wait logging.
    /// TOML: `gateway.quiet_mode`. Default: `false`.
    #[serde(default)]
    pub quiet_mode: bool,

    /// Per-attempt upstream request timeout in seconds.
    /// TOML: `gateway.request_timeout_seconds`. Default: `300`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Optional upstream HTTP proxy for reqwest clients.
    /// TOML: `gateway.proxy`. Example: `http://127.0.0.1:1080`.
    #[serde(default)]
    pub proxy: Option<Url>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_wait_seconds: default_max_rate_limit_wait_seconds(),
            quota_fallback: default_quota_fallback(),
            max_retries: default_max_retries(),
            quiet_mode: false,
            request_timeout_seconds: default_request_timeout_seconds(),
            proxy: None,
        }
    }
}

impl GatewayConfig {
    pub fn resolve(&self) -> GatewayResolvedConfig {
        GatewayResolvedConfig {
            max_rate_limit_wait_seconds: self.max_rate_limit_wait_seconds,
            quota_fallback: self.quota_fallback,
            max_retries: self.max_retries,
            quiet_mode: self.quiet_mode,
            request_timeout_seconds: self.request_timeout_seconds,
            proxy: self.proxy.clone(),
            endpoint_daily: fixed_url(wire::CLOUDCODE_ENDPOINT_DAILY),
            endpoint_autopush: fixed_url(wire::CLOUDCODE_ENDPOINT_AUTOPUSH),
            endpoint_prod: fixed_url(wire::CLOUDCODE_ENDPOINT_PROD),
            oauth_auth_url: fixed_url(wire::GOOGLE_AUTH_URL),
            oauth_token_url: fixed_url(wire::GOOGLE_TOKEN_URL),
            oauth_userinfo_url: fixed_url(wire::GOOGLE_USERINFO_URL),
            oauth_redirect_url: fixed_url(wire::OAUTH_REDIRECT_URI),
            oauth_client_id: wire::OAUTH_CLIENT_ID.to_string(),
            oauth_client_secret: wire::OAUTH_CLIENT_SECRET.to_string(),
            oauth_scopes: wire::OAUTH_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Fully resolved gateway configuration: tunables plus fixed wire values.
#[derive(Debug, Clone)]
pub struct GatewayResolvedConfig {
    pub max_rate_limit_wait_seconds: u64,
    pub quota_fallback: bool,
    pub max_retries: u32,
    pub quiet_mode: bool,
    pub request_timeout_seconds: u64,
    pub proxy: Option<Url>,
    pub endpoint_daily: Url,
    pub endpoint_autopush: Url,
    pub endpoint_prod: Url,
    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_userinfo_url: Url,
    pub oauth_redirect_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_scopes: Vec<String>,
}

impl Default for GatewayResolvedConfig {
    fn default() -> Self {
        GatewayConfig::default().resolve()
    }
}

fn fixed_url(raw: &'static str) -> Url {
    Url::parse(raw).expect("fixed wire URL must be valid")
}

fn default_max_rate_limit_wait_seconds() -> u64 {
    300
}

fn default_quota_fallback() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_seconds() -> u64 {
    300
}
