//! Token manager: composite refresh-secret handling, expiry checks, and
//! rotation-aware access-token refresh against the Google token endpoint.

use chrono::Utc;
use oauth2::{RedirectUrl, RefreshToken, TokenResponse};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{GatewayResolvedConfig, wire};
use crate::error::OauthError;

use super::oauth_utils::{StandardOauth2Client, build_oauth2_client};

/// Parsed components of a stored composite refresh secret.
///
/// Wire format: `"<refresh_token>|<projectId?>|<managedProjectId?>"`. The pipe
/// convention must be preserved exactly for on-disk compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshParts {
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub managed_project_id: Option<String>,
}

impl RefreshParts {
    pub fn parse(refresh: &str) -> Self {
        let mut parts = refresh.split('|');
        let refresh_token = parts.next().unwrap_or_default().to_string();
        let project_id = parts.next().filter(|s| !s.is_empty()).map(ToString::to_string);
        let managed_project_id = parts.next().filter(|s| !s.is_empty()).map(ToString::to_string);
        RefreshParts {
            refresh_token,
            project_id,
            managed_project_id,
        }
    }

    /// Inverse of [`RefreshParts::parse`]. The project-id separator is always
    /// emitted; the managed-project separator only when that component exists.
    pub fn format(&self) -> String {
        let base = format!(
            "{}|{}",
            self.refresh_token,
            self.project_id.as_deref().unwrap_or_default()
        );
        match self.managed_project_id.as_deref() {
            Some(managed) => format!("{base}|{managed}"),
            None => base,
        }
    }
}

/// OAuth authentication details for one identity.
#[derive(Debug, Clone)]
pub struct AuthDetails {
    /// Composite refresh secret (see [`RefreshParts`]).
    pub refresh: String,
    /// Current access token, empty when never fetched.
    pub access: String,
    /// Access-token expiry in milliseconds since epoch, 0 when unknown.
    pub expires: i64,
    pub email: Option<String>,
}

impl AuthDetails {
    /// An access token counts as expired when missing, when its expiry is
    /// unknown, or within the one-minute safety buffer of expiring.
    pub fn is_expired(&self) -> bool {
        if self.access.is_empty() || self.expires == 0 {
            return true;
        }
        self.expires <= Utc::now().timestamp_millis() + wire::ACCESS_TOKEN_EXPIRY_BUFFER_MS
    }
}

/// Expiry timestamp for a token fetched at `request_time_ms` that lives for
/// `expires_in_seconds`.
pub fn token_expiry(request_time_ms: i64, expires_in_seconds: i64) -> i64 {
    if expires_in_seconds <= 0 {
        return request_time_ms;
    }
    request_time_ms + expires_in_seconds * 1000
}

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Refreshes access tokens through the fixed Google token endpoint.
pub struct TokenManager {
    cfg: GatewayResolvedConfig,
    http: reqwest::Client,
}

impl TokenManager {
    pub fn new(cfg: GatewayResolvedConfig, http: reqwest::Client) -> Self {
        TokenManager { cfg, http }
    }

    fn oauth2_client(&self) -> Result<StandardOauth2Client, OauthError> {
        let redirect = RedirectUrl::new(self.cfg.oauth_redirect_url.to_string()).map_err(|e| {
            OauthError::Other {
                message: format!("invalid redirect url: {e}"),
            }
        })?;
        build_oauth2_client(
            &self.cfg.oauth_client_id,
            Some(&self.cfg.oauth_client_secret),
            self.cfg.oauth_auth_url.as_str(),
            self.cfg.oauth_token_url.as_str(),
            redirect,
        )
        .map_err(|e| OauthError::Other {
            message: format!("failed to build oauth2 client: {e}"),
        })
    }

    /// Refresh an access token using the composite refresh secret.
    ///
    /// `Ok(Some(_))` carries the new details, with the composite secret
    /// rewritten if the endpoint rotated the refresh token (project-id
    /// components are preserved). `Ok(None)` means "no new auth" — a
    /// transient per-identity failure. `Err(OauthError::Revoked)` is the
    /// distinguished `invalid_grant` outcome.
    pub async fn refresh(&self, auth: &AuthDetails) -> Result<Option<AuthDetails>, OauthError> {
        let parts = RefreshParts::parse(&auth.refresh);
        if parts.refresh_token.is_empty() {
            return Ok(None);
        }

        let start_ms = Utc::now().timestamp_millis();
        let client = self.oauth2_client()?;

        let token = match client
            .exchange_refresh_token(&RefreshToken::new(parts.refresh_token.clone()))
            .request_async(&self.http)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                let err = OauthError::from(err);
                if matches!(err, OauthError::Revoked { .. }) {
                    return Err(err);
                }
                warn!(email = ?auth.email, "token refresh failed: {err}");
                return Ok(None);
            }
        };

        let access = token.access_token().secret().to_string();
        if access.is_empty() {
            return Ok(None);
        }

        let expires_in = token
            .expires_in()
            .map_or(DEFAULT_EXPIRES_IN_SECS, |d: Duration| {
                i64::try_from(d.as_secs()).unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            });

        // Token rotation: a returned refresh token replaces the stored one,
        // project components ride along unchanged.
        let rotated = RefreshParts {
            refresh_token: token
                .refresh_token()
                .map_or(parts.refresh_token, |t| t.secret().to_string()),
            project_id: parts.project_id,
            managed_project_id: parts.managed_project_id,
        };

        debug!(email = ?auth.email, expires_in, "access token refreshed");
        Ok(Some(AuthDetails {
            refresh: rotated.format(),
            access,
            expires: token_expiry(start_ms, expires_in),
            email: auth.email.clone(),
        }))
    }
}
