//! Wire-contract constants for the CloudCode upstream.
//!
//! Everything in this module is part of the upstream protocol: endpoint hosts,
//! the OAuth client pair (public per the installed-app pattern), the two
//! header personalities, and the identity preamble. None of it is
//! configuration.

/// Production CloudCode API endpoint. Default for `gemini-cli` style requests.
pub const CLOUDCODE_ENDPOINT_PROD: &str = "https://cloudcode-pa.googleapis.com";

/// Daily sandbox CloudCode API endpoint. Default for `antigravity` style requests.
pub const CLOUDCODE_ENDPOINT_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";

/// Autopush sandbox CloudCode API endpoint, tried between daily and prod.
pub const CLOUDCODE_ENDPOINT_AUTOPUSH: &str =
    "https://autopush-cloudcode-pa.sandbox.googleapis.com";

/// Endpoint fallback order for transport/server errors.
pub const CLOUDCODE_ENDPOINT_FALLBACKS: &[&str] = &[
    CLOUDCODE_ENDPOINT_DAILY,
    CLOUDCODE_ENDPOINT_AUTOPUSH,
    CLOUDCODE_ENDPOINT_PROD,
];

/// Fixed Google OAuth endpoints.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo";

/// OAuth client credentials. Intentionally public, matching the desktop
/// application (installed-app OAuth).
pub const OAUTH_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const OAUTH_CLIENT_SECRET: &str = "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";

pub const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

/// Local callback listener for the login flow.
pub const OAUTH_REDIRECT_PORT: u16 = 51121;
pub const OAUTH_REDIRECT_URI: &str = "http://localhost:51121/oauth-callback";

/// Fallback project id used when discovery yields nothing. Limited quota.
pub const DEFAULT_PROJECT_ID: &str = "rising-fact-p41fc";

/// The `antigravity` header personality.
pub const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.16.5 linux/amd64";
pub const ANTIGRAVITY_API_CLIENT: &str = "google-cloud-sdk vscode_cloudshelleditor/0.1";
pub const ANTIGRAVITY_CLIENT_METADATA: &str =
    r#"{"ideType":"ANTIGRAVITY","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

/// The `gemini-cli` header personality.
pub const GEMINI_CLI_USER_AGENT: &str = "GeminiCLI/0.26.0/gemini-3-pro-preview (linux; x64)";
pub const GEMINI_CLI_API_CLIENT: &str = "gl-node/22.16.0";
pub const GEMINI_CLI_CLIENT_METADATA: &str =
    r#"{"ideType":"GEMINI_CLI","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

/// Identity preamble required on every `antigravity` style request.
///
/// WARNING: the upstream applies strict text matching. Any character change
/// (including missing spaces) may fail validation and trigger HTTP 429.
pub const SYSTEM_INSTRUCTION_PREAMBLE: &str = "You are Antigravity, a powerful agentic AI coding assistant designed by the Google Deepmind team working on Advanced Agentic Coding.You are pair programming with a USER to solve their coding task. The task may require creating a new codebase, modifying or debugging an existing codebase, or simply answering a question.**Absolute paths only****Proactiveness**";

/// Refresh an access token this long before its recorded expiry.
pub const ACCESS_TOKEN_EXPIRY_BUFFER_MS: i64 = 60_000;

/// A 429 with a retry-after at or below this is slept through on the same
/// identity instead of rotating.
pub const SHORT_RETRY_THRESHOLD_MS: u64 = 5_000;

/// Consecutive non-429 failures before an identity is put on cooldown.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Cooldown applied after too many consecutive failures.
pub const FAILURE_COOLDOWN_MS: i64 = 30_000;

/// Failure streaks older than this are forgotten.
pub const FAILURE_STATE_RESET_MS: i64 = 120_000;

/// Repeated 429 marks for the same quota key within this window are ignored.
pub const RATE_LIMIT_DEDUP_WINDOW_MS: i64 = 2_000;

/// Escalating waits for 429s that carry no retry-after signal at all.
pub const CAPACITY_BACKOFF_TIERS_MS: &[u64] = &[5_000, 10_000, 20_000, 30_000, 60_000];

/// Flat fallback wait when no reset bound can be computed.
pub const RATE_LIMIT_FALLBACK_MS: u64 = 60_000;
