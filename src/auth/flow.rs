//! Interactive OAuth login: authorization-code + PKCE, state round-tripping,
//! userinfo and project-id discovery.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::config::{GatewayResolvedConfig, wire};
use crate::error::{CastorError, IsRetryable, OauthError};

use super::oauth_utils::build_oauth2_client;
use super::token::token_expiry;

/// Result of generating an authorization URL.
pub struct AuthorizationRequest {
    pub url: Url,
    pub verifier: String,
    pub project_id: String,
}

/// Everything the login flow hands to `add-or-update`.
#[derive(Debug)]
pub struct LoginResult {
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: String,
    pub expires_at: i64,
    pub project_id: Option<String>,
    pub managed_project_id: Option<String>,
}

/// Encode the PKCE verifier and optional project id into the OAuth `state`
/// parameter (unpadded base64url JSON).
pub fn encode_state(verifier: &str, project_id: &str) -> String {
    let payload = json!({ "verifier": verifier, "projectId": project_id });
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

/// Inverse of [`encode_state`].
pub fn decode_state(state: &str) -> Result<(String, String), CastorError> {
    let raw = URL_SAFE_NO_PAD
        .decode(state)
        .map_err(|e| CastorError::Unexpected(format!("invalid OAuth state encoding: {e}")))?;
    let payload: Value = serde_json::from_slice(&raw)?;

    let verifier = payload
        .get("verifier")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let project_id = payload
        .get("projectId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok((verifier, project_id))
}

/// Build the Google authorization URL with PKCE challenge and encoded state.
pub fn build_authorization_url(
    cfg: &GatewayResolvedConfig,
    project_id: &str,
) -> Result<AuthorizationRequest, CastorError> {
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let state = encode_state(pkce_verifier.secret(), project_id);

    let redirect = RedirectUrl::new(cfg.oauth_redirect_url.to_string())?;
    let client = build_oauth2_client(
        &cfg.oauth_client_id,
        Some(&cfg.oauth_client_secret),
        cfg.oauth_auth_url.as_str(),
        cfg.oauth_token_url.as_str(),
        redirect,
    )?;

    let mut req = client
        .authorize_url(move || CsrfToken::new(state))
        .set_pkce_challenge(pkce_challenge)
        // Offline access plus forced consent, so a refresh token is returned.
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent");

    for scope in &cfg.oauth_scopes {
        req = req.add_scope(Scope::new(scope.clone()));
    }

    let (url, _state) = req.url();
    Ok(AuthorizationRequest {
        url,
        verifier: pkce_verifier.secret().to_string(),
        project_id: project_id.to_string(),
    })
}

/// Exchange an authorization code for tokens, then resolve the user email
/// and a project id.
pub async fn exchange_code(
    cfg: &GatewayResolvedConfig,
    http: &reqwest::Client,
    code: &str,
    state: &str,
) -> Result<LoginResult, CastorError> {
    let (verifier, state_project_id) = decode_state(state)?;
    if verifier.is_empty() {
        return Err(CastorError::Unexpected(
            "missing PKCE verifier in OAuth state".to_string(),
        ));
    }

    let start_ms = Utc::now().timestamp_millis();

    let redirect = RedirectUrl::new(cfg.oauth_redirect_url.to_string())?;
    let client = build_oauth2_client(
        &cfg.oauth_client_id,
        Some(&cfg.oauth_client_secret),
        cfg.oauth_auth_url.as_str(),
        cfg.oauth_token_url.as_str(),
        redirect,
    )?;

    let token = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .set_pkce_verifier(PkceCodeVerifier::new(verifier))
        .request_async(http)
        .await
        .map_err(OauthError::from)?;

    let access_token = token.access_token().secret().to_string();
    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().to_string())
        .ok_or_else(|| CastorError::Oauth(OauthError::Flow {
            code: "MISSING_REFRESH_TOKEN".to_string(),
            message: "token exchange returned no refresh token".to_string(),
        }))?;

    let expires_in = token
        .expires_in()
        .map_or(3600, |d: Duration| i64::try_from(d.as_secs()).unwrap_or(3600));

    let email = fetch_user_email(cfg, http, &access_token).await;

    let project_id = if state_project_id.is_empty() {
        fetch_project_id(cfg, http, &access_token).await
    } else {
        Some(state_project_id)
    };

    info!(email = ?email, project_id = ?project_id, "login code exchange completed");
    Ok(LoginResult {
        email,
        refresh_token,
        access_token,
        expires_at: token_expiry(start_ms, expires_in),
        project_id,
        managed_project_id: None,
    })
}

/// Fetch the user's email via the userinfo endpoint. Best effort.
pub async fn fetch_user_email(
    cfg: &GatewayResolvedConfig,
    http: &reqwest::Client,
    access_token: &str,
) -> Option<String> {
    #[derive(Deserialize)]
    struct UserInfo {
        email: Option<String>,
    }

    let resp = http
        .get(cfg.oauth_userinfo_url.clone())
        .query(&[("alt", "json")])
        .bearer_auth(access_token)
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    resp.json::<UserInfo>().await.ok()?.email
}

/// Discover the user's CloudCode project id via `loadCodeAssist`.
///
/// Endpoints are tried prod-first: fresh accounts resolve more reliably
/// there. Each attempt gets a small network-aware retry.
pub async fn fetch_project_id(
    cfg: &GatewayResolvedConfig,
    http: &reqwest::Client,
    access_token: &str,
) -> Option<String> {
    use backon::{ExponentialBuilder, Retryable};

    let retry_policy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(2)
        .with_jitter();

    for base in [
        &cfg.endpoint_prod,
        &cfg.endpoint_daily,
        &cfg.endpoint_autopush,
    ] {
        let result = (|| async { load_code_assist(http, base, access_token).await })
            .retry(retry_policy)
            .when(OauthError::is_retryable)
            .notify(|err, dur: Duration| {
                warn!("loadCodeAssist retrying after error {err}, sleeping {dur:?}");
            })
            .await;

        match result {
            Ok(Some(project_id)) => return Some(project_id),
            Ok(None) => continue,
            Err(err) => {
                warn!(base = %base, "loadCodeAssist failed: {err}");
                continue;
            }
        }
    }
    None
}

async fn load_code_assist(
    http: &reqwest::Client,
    base: &Url,
    access_token: &str,
) -> Result<Option<String>, OauthError> {
    let url = format!(
        "{}/v1internal:loadCodeAssist",
        base.as_str().trim_end_matches('/')
    );

    let body = json!({
        "metadata": {
            "ideType": "IDE_UNSPECIFIED",
            "platform": "PLATFORM_UNSPECIFIED",
            "pluginType": "GEMINI"
        }
    });

    let resp = http
        .post(url)
        .bearer_auth(access_token)
        .header("User-Agent", "google-api-nodejs-client/9.15.1")
        .header("X-Goog-Api-Client", wire::ANTIGRAVITY_API_CLIENT)
        .header("Client-Metadata", wire::ANTIGRAVITY_CLIENT_METADATA)
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(OauthError::UpstreamStatus(resp.status()));
    }

    let payload: Value = resp.json().await?;
    // The project arrives as a plain string or an object with an `id`.
    let project = payload.get("cloudaicompanionProject");
    Ok(project.and_then(|p| match p {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(ToString::to_string),
        _ => None,
    }))
}
