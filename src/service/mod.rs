//! The dispatch loop: binds pool selection, token refresh, request
//! preparation and outcome classification into one retrying engine.

use futures::Stream;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use castor_schema::{Content, GenerationConfig};

use crate::auth::{AuthDetails, TokenManager};
use crate::config::{GatewayResolvedConfig, wire};
use crate::error::{CastorError, OauthError};
use crate::model::{self, HeaderStyle, ModelFamily};
use crate::pool::{AccountLease, AccountPool};
use crate::storage::AccountStore;
use crate::upstream::{
    CloudCodeClient, ExecuteOutcome, StreamEvent, StreamStart, prepare_request, stream,
};

/// The request engine. One instance serves all in-flight requests; the pool
/// is the only shared mutable state and is guarded by a mutex that is never
/// held across I/O.
pub struct Gateway {
    cfg: GatewayResolvedConfig,
    store: AccountStore,
    pool: Arc<Mutex<AccountPool>>,
    client: CloudCodeClient,
    tokens: TokenManager,
    /// Access-token cache keyed by pool index. Stale entries are refreshed
    /// opportunistically on use.
    auth_cache: Mutex<HashMap<usize, AuthDetails>>,
}

fn build_http_client(
    cfg: &GatewayResolvedConfig,
    connect_timeout: Duration,
    timeout: Duration,
) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .timeout(timeout);

    if let Some(proxy_url) = cfg.proxy.clone() {
        match reqwest::Proxy::all(proxy_url.as_str()) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => warn!("ignoring invalid proxy url: {err}"),
        }
    }

    builder.build().expect("failed to build reqwest client")
}

enum LimitAction {
    /// Sleep this long and retry the same identity.
    ShortRetry(u64),
    /// Retry the same identity on the other quota.
    Rebind(HeaderStyle),
    /// Count the attempt and rotate.
    Rotate(u64),
}

impl Gateway {
    /// Load the pool from disk and stand up the HTTP machinery.
    pub fn load(cfg: GatewayResolvedConfig, store: AccountStore) -> Self {
        let pool = AccountPool::from_stored(store.load().unwrap_or_default());

        let upstream_http = build_http_client(
            &cfg,
            Duration::from_secs(10),
            Duration::from_secs(cfg.request_timeout_seconds),
        );
        let oauth_http =
            build_http_client(&cfg, Duration::from_secs(5), Duration::from_secs(30));

        Gateway {
            client: CloudCodeClient::new(&cfg, upstream_http),
            tokens: TokenManager::new(cfg.clone(), oauth_http),
            cfg,
            store,
            pool: Arc::new(Mutex::new(pool)),
            auth_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GatewayResolvedConfig {
        &self.cfg
    }

    fn pool(&self) -> MutexGuard<'_, AccountPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_auth(&self, index: usize) -> Option<AuthDetails> {
        self.auth_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    fn cache_auth(&self, index: usize, auth: AuthDetails) {
        self.auth_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, auth);
    }

    fn drop_cached_auth(&self, index: usize) {
        self.auth_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }

    async fn persist(&self) {
        let snapshot = self.pool().to_stored();
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to persist account pool: {err}"),
            Err(err) => warn!("persist task failed: {err}"),
        }
    }

    /// Fresh auth for a leased identity, refreshing through the token
    /// endpoint when the cached access token is missing or near expiry.
    ///
    /// `Ok(None)` is a transient per-identity failure. A revoked refresh
    /// token evicts the identity, persists the pool and surfaces
    /// [`CastorError::TokenRevoked`].
    async fn auth_for(&self, lease: &AccountLease) -> Result<Option<AuthDetails>, CastorError> {
        let cached = self.cached_auth(lease.index);
        if let Some(auth) = &cached {
            if !auth.is_expired() {
                return Ok(Some(auth.clone()));
            }
        }

        let Some(mut auth) = self.pool().get(lease.id).map(|acc| acc.auth_details()) else {
            return Ok(None);
        };
        if let Some(cached) = cached {
            auth.access = cached.access;
            auth.expires = cached.expires;
        }

        if !auth.is_expired() {
            self.cache_auth(lease.index, auth.clone());
            return Ok(Some(auth));
        }

        let refresh_before = auth.refresh.clone();
        match self.tokens.refresh(&auth).await {
            Ok(Some(refreshed)) => {
                let rotated = refreshed.refresh != refresh_before;
                self.pool().update_after_refresh(lease.id, &refreshed);
                self.cache_auth(lease.index, refreshed.clone());
                if rotated {
                    // Rotation must be durable: losing the new secret
                    // disables the identity.
                    self.persist().await;
                }
                Ok(Some(refreshed))
            }
            Ok(None) => Ok(None),
            Err(OauthError::Revoked { description }) => {
                let email = {
                    let mut pool = self.pool();
                    pool.remove(lease.id).and_then(|acc| acc.email)
                };
                self.drop_cached_auth(lease.index);
                self.persist().await;
                warn!(email = ?email, "identity evicted: {description}");
                Err(CastorError::TokenRevoked { email })
            }
            Err(err) => {
                warn!(email = ?lease.email, "token refresh errored: {err}");
                Ok(None)
            }
        }
    }

    /// Classify a 429 for the leased identity: short retry, quota rebind, or
    /// rotation. Marks the quota and persists except in the short-retry
    /// case.
    async fn classify_rate_limit(
        &self,
        lease: &AccountLease,
        family: ModelFamily,
        style: HeaderStyle,
        model: &str,
        retry_after_ms: Option<u64>,
    ) -> LimitAction {
        let delay = self.pool().resolve_retry_delay(
            lease.id,
            family,
            style,
            Some(model),
            retry_after_ms,
        );

        if delay <= wire::SHORT_RETRY_THRESHOLD_MS {
            return LimitAction::ShortRetry(delay);
        }

        self.pool()
            .mark_rate_limited(lease.id, delay, family, style, Some(model));
        self.persist().await;

        if self.cfg.quota_fallback && family == ModelFamily::Gemini {
            if let Some(alt) = self.pool().available_style(lease.id, family, Some(model)) {
                if alt != style {
                    if !self.cfg.quiet_mode {
                        info!(email = ?lease.email, %alt, "quota exhausted, trying other quota");
                    }
                    return LimitAction::Rebind(alt);
                }
            }
        }

        LimitAction::Rotate(delay)
    }

    /// Wait-or-fail decision when no identity is available.
    fn no_identity_wait(&self, family: ModelFamily, model: &str) -> Result<u64, CastorError> {
        let wait_ms = self.pool().min_wait_ms(family, Some(model));
        let max_wait_ms = self.cfg.max_rate_limit_wait_seconds * 1000;
        if max_wait_ms > 0 && wait_ms > max_wait_ms {
            return Err(CastorError::AllRateLimited { wait_ms });
        }
        Ok(wait_ms)
    }

    /// Generate and collect the full response text (SSE collect mode).
    pub async fn generate(
        &self,
        model: &str,
        contents: Vec<Content>,
        system_prompt: Option<&str>,
        generation_config: Option<GenerationConfig>,
    ) -> Result<String, CastorError> {
        let family = model::family_of(model);
        let mut style = model::style_of(model);

        if self.pool().is_empty() {
            return Err(CastorError::NoIdentities);
        }

        let mut tries = 0;
        let mut last_error: Option<CastorError> = None;

        while tries < self.cfg.max_retries {
            let lease = self
                .pool()
                .get_current_or_next(family, Some(model), style);
            let Some(lease) = lease else {
                if self.pool().is_empty() {
                    return Err(CastorError::NoIdentities);
                }
                let wait_ms = self.no_identity_wait(family, model)?;
                if !self.cfg.quiet_mode {
                    info!(wait_ms, "all identities rate-limited, waiting");
                }
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                continue;
            };

            let auth = match self.auth_for(&lease).await {
                Ok(Some(auth)) if !auth.access.is_empty() => auth,
                Ok(_) => {
                    tries += 1;
                    last_error = Some(CastorError::Unexpected(
                        "failed to get access token".to_string(),
                    ));
                    continue;
                }
                Err(err) => {
                    tries += 1;
                    last_error = Some(err);
                    continue;
                }
            };

            let prepared = prepare_request(
                &self.cfg,
                model,
                contents.clone(),
                &auth.access,
                lease.project_id.as_deref(),
                Some(style),
                system_prompt,
                generation_config.clone(),
                true,
            )?;

            crate::utils::logging::with_pretty_json_debug(&prepared.body, |pretty| {
                tracing::debug!(
                    model = %prepared.effective_model,
                    %style,
                    body = %pretty,
                    "prepared upstream payload"
                );
            });

            match self.client.execute(&prepared).await {
                Ok(ExecuteOutcome::RateLimited { retry_after_ms }) => {
                    match self
                        .classify_rate_limit(&lease, family, style, model, retry_after_ms)
                        .await
                    {
                        LimitAction::ShortRetry(delay) => {
                            if !self.cfg.quiet_mode {
                                info!(delay, "short rate limit, retrying same identity");
                            }
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                        LimitAction::Rebind(alt) => style = alt,
                        LimitAction::Rotate(delay) => {
                            tries += 1;
                            last_error = Some(CastorError::Upstream {
                                status: StatusCode::TOO_MANY_REQUESTS,
                                message: format!("rate limited for {}s", delay / 1000),
                            });
                        }
                    }
                }

                Ok(ExecuteOutcome::Success { body, .. }) => {
                    self.pool().record_success(lease.id);
                    self.persist().await;
                    return Ok(body.extract_text());
                }

                Ok(ExecuteOutcome::Failed { status, message }) => {
                    self.pool().record_failure(lease.id, "upstream-error");
                    tries += 1;
                    last_error = Some(CastorError::Upstream { status, message });
                }

                Err(err) => {
                    self.pool().record_failure(lease.id, "network-error");
                    tries += 1;
                    last_error = Some(err);
                }
            }
        }

        let max_retries = self.cfg.max_retries;
        warn!(max_retries, "dispatch exhausted retries");
        Err(last_error.unwrap_or_else(|| {
            CastorError::Unexpected(format!("failed after {max_retries} retries"))
        }))
    }

    /// Generate with live streaming: yields text chunks as they arrive.
    ///
    /// Rate limits before the first byte go through the same
    /// marking/fallback logic as the buffered path; once the stream has
    /// started, errors are surfaced to the caller after marking the
    /// identity.
    pub async fn generate_stream(
        &self,
        model: &str,
        contents: Vec<Content>,
        system_prompt: Option<&str>,
        generation_config: Option<GenerationConfig>,
    ) -> Result<impl Stream<Item = Result<String, CastorError>> + Send + use<>, CastorError> {
        let family = model::family_of(model);
        let mut style = model::style_of(model);

        if self.pool().is_empty() {
            return Err(CastorError::NoIdentities);
        }

        let mut tries = 0;
        let mut last_error: Option<CastorError> = None;

        while tries < self.cfg.max_retries {
            let lease = self
                .pool()
                .get_current_or_next(family, Some(model), style);
            let Some(lease) = lease else {
                if self.pool().is_empty() {
                    return Err(CastorError::NoIdentities);
                }
                let wait_ms = self.no_identity_wait(family, model)?;
                if !self.cfg.quiet_mode {
                    info!(wait_ms, "all identities rate-limited, waiting");
                }
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                continue;
            };

            let auth = match self.auth_for(&lease).await {
                Ok(Some(auth)) if !auth.access.is_empty() => auth,
                Ok(_) => {
                    tries += 1;
                    last_error = Some(CastorError::Unexpected(
                        "failed to get access token".to_string(),
                    ));
                    continue;
                }
                Err(err) => {
                    tries += 1;
                    last_error = Some(err);
                    continue;
                }
            };

            let prepared = prepare_request(
                &self.cfg,
                model,
                contents.clone(),
                &auth.access,
                lease.project_id.as_deref(),
                Some(style),
                system_prompt,
                generation_config.clone(),
                true,
            )?;

            match self.client.execute_streaming(&prepared).await {
                Ok(StreamStart::RateLimited { retry_after_ms }) => {
                    match self
                        .classify_rate_limit(&lease, family, style, model, retry_after_ms)
                        .await
                    {
                        LimitAction::ShortRetry(delay) => {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                        LimitAction::Rebind(alt) => style = alt,
                        LimitAction::Rotate(delay) => {
                            tries += 1;
                            last_error = Some(CastorError::Upstream {
                                status: StatusCode::TOO_MANY_REQUESTS,
                                message: format!("rate limited for {}s", delay / 1000),
                            });
                        }
                    }
                }

                Ok(StreamStart::Live(resp)) => {
                    return Ok(self.wrap_stream(resp, lease, family, style, model.to_string()));
                }

                Err(err @ CastorError::Upstream { .. }) => {
                    self.pool().record_failure(lease.id, "upstream-error");
                    tries += 1;
                    last_error = Some(err);
                }

                Err(err) => {
                    self.pool().record_failure(lease.id, "network-error");
                    tries += 1;
                    last_error = Some(err);
                }
            }
        }

        let max_retries = self.cfg.max_retries;
        Err(last_error.unwrap_or_else(|| {
            CastorError::Unexpected(format!("failed after {max_retries} retries"))
        }))
    }

    fn wrap_stream(
        &self,
        resp: reqwest::Response,
        lease: AccountLease,
        family: ModelFamily,
        style: HeaderStyle,
        model: String,
    ) -> impl Stream<Item = Result<String, CastorError>> + Send + use<> {
        struct StreamState {
            events: Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
            pool: Arc<Mutex<AccountPool>>,
            store: AccountStore,
            lease: AccountLease,
            family: ModelFamily,
            style: HeaderStyle,
            model: String,
            finished: bool,
        }

        async fn persist_pool(pool: &Arc<Mutex<AccountPool>>, store: &AccountStore) {
            let snapshot = pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .to_stored();
            let store = store.clone();
            if let Ok(Err(err)) = tokio::task::spawn_blocking(move || store.save(&snapshot)).await
            {
                warn!("failed to persist account pool: {err}");
            }
        }

        let state = StreamState {
            events: Box::pin(stream::text_chunks(resp)),
            pool: Arc::clone(&self.pool),
            store: self.store.clone(),
            lease,
            family,
            style,
            model,
            finished: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            use futures::StreamExt as _;

            if st.finished {
                return None;
            }

            match st.events.next().await {
                Some(StreamEvent::Text(text)) => Some((Ok(text), st)),

                Some(StreamEvent::Done) | None => {
                    st.finished = true;
                    st.pool
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record_success(st.lease.id);
                    persist_pool(&st.pool, &st.store).await;
                    None
                }

                Some(StreamEvent::Error {
                    status,
                    retry_after_ms,
                    message,
                }) => {
                    st.finished = true;
                    let err = if status == Some(429) {
                        let delay = retry_after_ms.unwrap_or(wire::RATE_LIMIT_FALLBACK_MS);
                        {
                            let mut pool =
                                st.pool.lock().unwrap_or_else(PoisonError::into_inner);
                            pool.mark_rate_limited(
                                st.lease.id,
                                delay,
                                st.family,
                                st.style,
                                Some(&st.model),
                            );
                        }
                        persist_pool(&st.pool, &st.store).await;
                        CastorError::Upstream {
                            status: StatusCode::TOO_MANY_REQUESTS,
                            message,
                        }
                    } else {
                        {
                            let mut pool =
                                st.pool.lock().unwrap_or_else(PoisonError::into_inner);
                            pool.record_failure(st.lease.id, "network-error");
                        }
                        persist_pool(&st.pool, &st.store).await;
                        CastorError::StreamProtocol(message)
                    };
                    Some((Err(err), st))
                }
            }
        })
    }
}

/// Translate OpenAI-style chat messages into canonical upstream turns plus
/// an optional system prompt. `assistant` becomes `model`; anything outside
/// {`user`, `model`} becomes `user`.
pub fn translate_messages(
    messages: &[castor_schema::ChatMessage],
) -> (Vec<Content>, Option<String>) {
    let mut contents = Vec::new();
    let mut system_prompt: Option<String> = None;

    for message in messages {
        match message.role.as_str() {
            "system" => system_prompt = Some(message.content.clone()),
            role => {
                let role = match role {
                    "assistant" => "model",
                    "user" | "model" => role,
                    _ => "user",
                };
                contents.push(Content::text(
                    Some(role.to_string()),
                    message.content.clone(),
                ));
            }
        }
    }

    (contents, system_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_schema::ChatMessage;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn roles_are_translated_to_canonical_turns() {
        let (contents, system) = translate_messages(&[
            msg("system", "be terse"),
            msg("user", "hi"),
            msg("assistant", "hello"),
            msg("tool", "result"),
        ]);

        assert_eq!(system.as_deref(), Some("be terse"));
        let roles: Vec<_> = contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn last_system_message_wins() {
        let (_, system) =
            translate_messages(&[msg("system", "one"), msg("system", "two"), msg("user", "x")]);
        assert_eq!(system.as_deref(), Some("two"));
    }
}
