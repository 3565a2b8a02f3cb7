//! In-memory identity pool: per-identity, per-quota rate-limit state and the
//! sticky selection/rotation policy.
//!
//! Pure scheduling state, no I/O and no locks. The owning service wraps the
//! pool in a `tokio::sync::Mutex` and never holds it across network or file
//! operations.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::auth::{AuthDetails, RefreshParts};
use crate::config::wire;
use crate::model::{HeaderStyle, ModelFamily};
use crate::storage::{ActiveIndexByFamily, RateLimitResetTimes, StoredAccount, StoredAccounts};

pub type AccountId = u64;

/// Quota key for rate-limit tracking: `"claude"`,
/// `"gemini-antigravity"[:<model>]` or `"gemini-cli"[:<model>]`.
pub fn quota_key(family: ModelFamily, style: HeaderStyle, model: Option<&str>) -> String {
    if family == ModelFamily::Claude {
        return "claude".to_string();
    }

    let base = match style {
        HeaderStyle::Antigravity => "gemini-antigravity",
        HeaderStyle::GeminiCli => "gemini-cli",
    };
    match model {
        // Per-model tracking: model quotas reset independently.
        Some(model) => format!("{base}:{model}"),
        None => base.to_string(),
    }
}

fn base_quota_key(family: ModelFamily, style: HeaderStyle) -> &'static str {
    if family == ModelFamily::Claude {
        "claude"
    } else {
        match style {
            HeaderStyle::Antigravity => "gemini-antigravity",
            HeaderStyle::GeminiCli => "gemini-cli",
        }
    }
}

/// One identity with runtime scheduling state.
#[derive(Debug, Clone)]
pub struct ManagedAccount {
    pub id: AccountId,
    pub index: usize,
    pub email: Option<String>,
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub managed_project_id: Option<String>,
    pub added_at: i64,
    pub last_used: i64,
    pub last_switch_reason: Option<String>,
    /// Quota key -> reset timestamp (ms). Model-suffixed keys are
    /// runtime-only; base keys round-trip through storage.
    rate_limit_reset_times: HashMap<String, i64>,
    pub cooling_down_until: Option<i64>,
    pub cooldown_reason: Option<String>,
    pub consecutive_failures: u32,
    last_failure_at: i64,
    /// Quota key -> last time a 429 was recorded, for the dedup window.
    last_limited_at: HashMap<String, i64>,
    /// Quota key -> consecutive hint-less 429s, for the backoff ladder.
    capacity_strikes: HashMap<String, u32>,
}

impl ManagedAccount {
    fn from_stored(id: AccountId, index: usize, stored: StoredAccount) -> Self {
        let mut resets = HashMap::new();
        let times = &stored.rate_limit_reset_times;
        if let Some(ts) = times.claude {
            resets.insert("claude".to_string(), ts);
        }
        if let Some(ts) = times.gemini_antigravity {
            resets.insert("gemini-antigravity".to_string(), ts);
        }
        if let Some(ts) = times.gemini_cli {
            resets.insert("gemini-cli".to_string(), ts);
        }

        ManagedAccount {
            id,
            index,
            email: stored.email,
            refresh_token: stored.refresh_token,
            project_id: stored.project_id,
            managed_project_id: stored.managed_project_id,
            added_at: stored.added_at,
            last_used: stored.last_used,
            last_switch_reason: stored.last_switch_reason,
            rate_limit_reset_times: resets,
            cooling_down_until: stored.cooling_down_until,
            cooldown_reason: stored.cooldown_reason,
            consecutive_failures: 0,
            last_failure_at: 0,
            last_limited_at: HashMap::new(),
            capacity_strikes: HashMap::new(),
        }
    }

    fn to_stored(&self) -> StoredAccount {
        StoredAccount {
            refresh_token: self.refresh_token.clone(),
            email: self.email.clone(),
            project_id: self.project_id.clone(),
            managed_project_id: self.managed_project_id.clone(),
            added_at: self.added_at,
            last_used: self.last_used,
            last_switch_reason: self.last_switch_reason.clone(),
            rate_limit_reset_times: RateLimitResetTimes {
                claude: self.rate_limit_reset_times.get("claude").copied(),
                gemini_antigravity: self
                    .rate_limit_reset_times
                    .get("gemini-antigravity")
                    .copied(),
                gemini_cli: self.rate_limit_reset_times.get("gemini-cli").copied(),
            },
            cooling_down_until: self.cooling_down_until,
            cooldown_reason: self.cooldown_reason.clone(),
        }
    }

    /// Reset timestamp for a quota key, honoring a persisted base-key entry
    /// when the model-suffixed one is absent or older.
    fn reset_for(&self, family: ModelFamily, style: HeaderStyle, model: Option<&str>) -> i64 {
        let keyed = self
            .rate_limit_reset_times
            .get(&quota_key(family, style, model))
            .copied()
            .unwrap_or(0);
        let base = self
            .rate_limit_reset_times
            .get(base_quota_key(family, style))
            .copied()
            .unwrap_or(0);
        keyed.max(base)
    }

    fn is_cooling_down(&self, now: i64) -> bool {
        self.cooling_down_until.is_some_and(|until| until > now)
    }

    /// Composite-secret view of this identity for the token manager.
    pub fn auth_details(&self) -> AuthDetails {
        let parts = RefreshParts::parse(&self.refresh_token);
        let parts = RefreshParts {
            refresh_token: parts.refresh_token,
            project_id: parts.project_id.or_else(|| self.project_id.clone()),
            managed_project_id: parts
                .managed_project_id
                .or_else(|| self.managed_project_id.clone()),
        };
        AuthDetails {
            refresh: parts.format(),
            access: String::new(),
            expires: 0,
            email: self.email.clone(),
        }
    }
}

/// Snapshot handed to the dispatch loop for one upstream attempt.
#[derive(Debug, Clone)]
pub struct AccountLease {
    pub id: AccountId,
    pub index: usize,
    pub email: Option<String>,
    pub project_id: Option<String>,
}

/// Ordered pool of identities plus per-family active index.
#[derive(Debug, Default)]
pub struct AccountPool {
    accounts: Vec<ManagedAccount>,
    active: ActiveIndexByFamily,
    next_id: AccountId,
}

impl AccountPool {
    pub fn from_stored(doc: StoredAccounts) -> Self {
        let mut pool = AccountPool {
            accounts: Vec::with_capacity(doc.accounts.len()),
            active: doc.active_index_by_family,
            next_id: 0,
        };
        for stored in doc.accounts {
            let id = pool.next_id;
            pool.next_id += 1;
            pool.accounts
                .push(ManagedAccount::from_stored(id, pool.accounts.len(), stored));
        }
        pool.clamp_active();
        pool
    }

    pub fn to_stored(&self) -> StoredAccounts {
        StoredAccounts {
            version: crate::storage::STORAGE_VERSION,
            accounts: self.accounts.iter().map(ManagedAccount::to_stored).collect(),
            active_index: self.active.gemini,
            active_index_by_family: self.active,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[ManagedAccount] {
        &self.accounts
    }

    pub fn get(&self, id: AccountId) -> Option<&ManagedAccount> {
        self.accounts.iter().find(|acc| acc.id == id)
    }

    fn get_mut(&mut self, id: AccountId) -> Option<&mut ManagedAccount> {
        self.accounts.iter_mut().find(|acc| acc.id == id)
    }

    fn active_index(&self, family: ModelFamily) -> usize {
        match family {
            ModelFamily::Gemini => self.active.gemini,
            ModelFamily::Claude => self.active.claude,
        }
    }

    fn set_active_index(&mut self, family: ModelFamily, index: usize) {
        match family {
            ModelFamily::Gemini => self.active.gemini = index,
            ModelFamily::Claude => self.active.claude = index,
        }
    }

    fn clamp_active(&mut self) {
        let max = self.accounts.len().saturating_sub(1);
        self.active.gemini = self.active.gemini.min(max);
        self.active.claude = self.active.claude.min(max);
    }

    /// Rate-limited for the family as a whole. Claude has a single quota; a
    /// Gemini identity is unavailable only when *both* of its quotas are
    /// exhausted.
    pub fn is_rate_limited(
        &self,
        account: &ManagedAccount,
        family: ModelFamily,
        model: Option<&str>,
    ) -> bool {
        let now = Utc::now().timestamp_millis();
        if account.is_cooling_down(now) {
            return true;
        }

        if family == ModelFamily::Claude {
            return account.reset_for(family, HeaderStyle::Antigravity, None) > now;
        }

        let antigravity = account.reset_for(family, HeaderStyle::Antigravity, model);
        let cli = account.reset_for(family, HeaderStyle::GeminiCli, model);
        antigravity > now && cli > now
    }

    /// Rate-limited for one specific header style.
    pub fn is_rate_limited_for_style(
        &self,
        account: &ManagedAccount,
        family: ModelFamily,
        style: HeaderStyle,
        model: Option<&str>,
    ) -> bool {
        let now = Utc::now().timestamp_millis();
        if account.is_cooling_down(now) {
            return true;
        }
        let model = if family == ModelFamily::Claude { None } else { model };
        account.reset_for(family, style, model) > now
    }

    /// Header style with remaining capacity, preferring `antigravity`.
    /// Claude only ever has the `antigravity` personality.
    pub fn available_style(
        &self,
        id: AccountId,
        family: ModelFamily,
        model: Option<&str>,
    ) -> Option<HeaderStyle> {
        let account = self.get(id)?;

        if !self.is_rate_limited_for_style(account, family, HeaderStyle::Antigravity, model) {
            return Some(HeaderStyle::Antigravity);
        }
        if family == ModelFamily::Claude {
            return None;
        }
        if !self.is_rate_limited_for_style(account, family, HeaderStyle::GeminiCli, model) {
            return Some(HeaderStyle::GeminiCli);
        }
        None
    }

    /// Sticky selection: keep the current identity while the preferred style
    /// still has capacity, otherwise rotate to the first identity with any
    /// capacity for the family. Returns `None` when everything is exhausted.
    pub fn get_current_or_next(
        &mut self,
        family: ModelFamily,
        model: Option<&str>,
        preferred_style: HeaderStyle,
    ) -> Option<AccountLease> {
        if self.accounts.is_empty() {
            return None;
        }

        let current_index = self.active_index(family).min(self.accounts.len() - 1);
        let current = &self.accounts[current_index];
        if !self.is_rate_limited_for_style(current, family, preferred_style, model) {
            let account = &mut self.accounts[current_index];
            account.last_used = Utc::now().timestamp_millis();
            return Some(lease_of(account));
        }

        for offset in 0..self.accounts.len() {
            let index = (current_index + offset) % self.accounts.len();
            if self.is_rate_limited(&self.accounts[index], family, model) {
                continue;
            }
            self.set_active_index(family, index);
            let account = &mut self.accounts[index];
            account.last_used = Utc::now().timestamp_millis();
            if index != current_index {
                account.last_switch_reason = Some("rate-limit".to_string());
            }
            return Some(lease_of(account));
        }

        None
    }

    /// Effective retry delay for a 429. A reported retry-after wins; without
    /// one the identity climbs the capacity backoff ladder for that quota
    /// key.
    pub fn resolve_retry_delay(
        &mut self,
        id: AccountId,
        family: ModelFamily,
        style: HeaderStyle,
        model: Option<&str>,
        retry_after_ms: Option<u64>,
    ) -> u64 {
        if let Some(ms) = retry_after_ms {
            return ms;
        }
        let key = quota_key(family, style, model);
        let Some(account) = self.get_mut(id) else {
            return wire::RATE_LIMIT_FALLBACK_MS;
        };
        let strikes = account.capacity_strikes.entry(key).or_insert(0);
        let tier = (*strikes as usize).min(wire::CAPACITY_BACKOFF_TIERS_MS.len() - 1);
        *strikes += 1;
        wire::CAPACITY_BACKOFF_TIERS_MS[tier]
    }

    /// Record a 429 for one quota key: reset = now + delay, overwriting any
    /// existing value. Re-marks within the dedup window are ignored.
    pub fn mark_rate_limited(
        &mut self,
        id: AccountId,
        retry_after_ms: u64,
        family: ModelFamily,
        style: HeaderStyle,
        model: Option<&str>,
    ) {
        let key = quota_key(family, style, model);
        let now = Utc::now().timestamp_millis();
        let Some(account) = self.get_mut(id) else {
            return;
        };

        if let Some(last) = account.last_limited_at.get(&key) {
            if now - last < wire::RATE_LIMIT_DEDUP_WINDOW_MS {
                debug!(id, key, "duplicate rate-limit mark ignored");
                return;
            }
        }

        let reset = now.saturating_add(i64::try_from(retry_after_ms).unwrap_or(i64::MAX));
        account.rate_limit_reset_times.insert(key.clone(), reset);
        account.last_limited_at.insert(key, now);
    }

    /// Put an identity on cooldown with a free-form reason.
    pub fn mark_cooling_down(&mut self, id: AccountId, cooldown_ms: i64, reason: &str) {
        let now = Utc::now().timestamp_millis();
        if let Some(account) = self.get_mut(id) {
            account.cooling_down_until = Some(now + cooldown_ms);
            account.cooldown_reason = Some(reason.to_string());
        }
    }

    /// Count a non-429 failure. Streaks older than the reset window start
    /// over; too many in a row put the identity on cooldown.
    pub fn record_failure(&mut self, id: AccountId, reason: &str) {
        let now = Utc::now().timestamp_millis();
        let Some(account) = self.get_mut(id) else {
            return;
        };

        if now - account.last_failure_at > wire::FAILURE_STATE_RESET_MS {
            account.consecutive_failures = 0;
        }
        account.last_failure_at = now;
        account.consecutive_failures += 1;

        if account.consecutive_failures >= wire::MAX_CONSECUTIVE_FAILURES {
            account.cooling_down_until = Some(now + wire::FAILURE_COOLDOWN_MS);
            account.cooldown_reason = Some(reason.to_string());
            account.consecutive_failures = 0;
        }
    }

    /// Successful exchange: clear the failure streak and capacity strikes.
    pub fn record_success(&mut self, id: AccountId) {
        if let Some(account) = self.get_mut(id) {
            account.consecutive_failures = 0;
            account.capacity_strikes.clear();
        }
    }

    /// Smallest positive wait until any identity regains capacity for the
    /// family. 0 when one is available now; a fixed fallback when no bound
    /// can be computed.
    pub fn min_wait_ms(&self, family: ModelFamily, model: Option<&str>) -> u64 {
        let now = Utc::now().timestamp_millis();
        let mut min_wait: Option<i64> = None;

        for account in &self.accounts {
            if !self.is_rate_limited(account, family, model) {
                return 0;
            }

            if let Some(until) = account.cooling_down_until {
                let wait = until - now;
                if wait > 0 {
                    min_wait = Some(min_wait.map_or(wait, |m| m.min(wait)));
                }
            }

            for (key, reset) in &account.rate_limit_reset_times {
                let is_claude_key = key.starts_with("claude");
                if (family == ModelFamily::Claude) != is_claude_key {
                    continue;
                }
                let wait = reset - now;
                if wait > 0 {
                    min_wait = Some(min_wait.map_or(wait, |m| m.min(wait)));
                }
            }
        }

        min_wait.map_or(wire::RATE_LIMIT_FALLBACK_MS, |ms| {
            u64::try_from(ms).unwrap_or(wire::RATE_LIMIT_FALLBACK_MS)
        })
    }

    /// Rewrite an identity after a token refresh: new refresh token, project
    /// fields preserved unless the rotation carried replacements.
    pub fn update_after_refresh(&mut self, id: AccountId, auth: &AuthDetails) {
        let Some(account) = self.get_mut(id) else {
            return;
        };
        let parts = RefreshParts::parse(&auth.refresh);
        account.refresh_token = parts.refresh_token;
        if let Some(project_id) = parts.project_id {
            account.project_id = Some(project_id);
        }
        if let Some(managed) = parts.managed_project_id {
            account.managed_project_id = Some(managed);
        }
        if let Some(email) = &auth.email {
            account.email = Some(email.clone());
        }
    }

    /// Remove an identity, reindex the rest and clamp active indices.
    pub fn remove(&mut self, id: AccountId) -> Option<ManagedAccount> {
        let position = self.accounts.iter().position(|acc| acc.id == id)?;
        let removed = self.accounts.remove(position);
        for (index, account) in self.accounts.iter_mut().enumerate() {
            account.index = index;
        }
        self.clamp_active();
        Some(removed)
    }
}

fn lease_of(account: &ManagedAccount) -> AccountLease {
    AccountLease {
        id: account.id,
        index: account.index,
        email: account.email.clone(),
        project_id: account.project_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(email: &str) -> StoredAccount {
        StoredAccount::new(Some(email.to_string()), format!("rt-{email}"), None, None)
    }

    fn pool_of(n: usize) -> AccountPool {
        let doc = StoredAccounts {
            accounts: (0..n).map(|i| stored(&format!("acc{i}@example.com"))).collect(),
            ..StoredAccounts::default()
        };
        AccountPool::from_stored(doc)
    }

    #[test]
    fn quota_keys_match_the_wire_grammar() {
        assert_eq!(
            quota_key(ModelFamily::Claude, HeaderStyle::Antigravity, Some("claude-x")),
            "claude"
        );
        assert_eq!(
            quota_key(ModelFamily::Gemini, HeaderStyle::Antigravity, None),
            "gemini-antigravity"
        );
        assert_eq!(
            quota_key(ModelFamily::Gemini, HeaderStyle::GeminiCli, Some("gemini-3-pro")),
            "gemini-cli:gemini-3-pro"
        );
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let mut pool = pool_of(0);
        assert!(
            pool.get_current_or_next(ModelFamily::Gemini, None, HeaderStyle::Antigravity)
                .is_none()
        );
    }

    #[test]
    fn sticky_selection_keeps_current_account() {
        let mut pool = pool_of(2);
        let first = pool
            .get_current_or_next(ModelFamily::Gemini, None, HeaderStyle::Antigravity)
            .unwrap();
        let second = pool
            .get_current_or_next(ModelFamily::Gemini, None, HeaderStyle::Antigravity)
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn marking_one_style_rotates_but_leaves_account_eligible() {
        let mut pool = pool_of(2);
        let model = Some("gemini-3-pro");
        let a = pool
            .get_current_or_next(ModelFamily::Gemini, model, HeaderStyle::Antigravity)
            .unwrap();

        pool.mark_rate_limited(
            a.id,
            90_000,
            ModelFamily::Gemini,
            HeaderStyle::Antigravity,
            model,
        );

        let a_ref = pool.get(a.id).unwrap();
        assert!(pool.is_rate_limited_for_style(
            a_ref,
            ModelFamily::Gemini,
            HeaderStyle::Antigravity,
            model
        ));
        // The gemini-cli quota is untouched, so the account as a whole is
        // still eligible for fallback.
        assert!(!pool.is_rate_limited(a_ref, ModelFamily::Gemini, model));
        assert_eq!(
            pool.available_style(a.id, ModelFamily::Gemini, model),
            Some(HeaderStyle::GeminiCli)
        );

        // Preferred-style selection moves on; the first scan offset is the
        // current index itself, which still has cli capacity.
        let next = pool
            .get_current_or_next(ModelFamily::Gemini, model, HeaderStyle::Antigravity)
            .unwrap();
        assert_eq!(next.id, a.id);
    }

    #[test]
    fn rotation_skips_fully_exhausted_accounts() {
        let mut pool = pool_of(2);
        let model = Some("gemini-3-pro");
        let a = pool
            .get_current_or_next(ModelFamily::Gemini, model, HeaderStyle::Antigravity)
            .unwrap();

        for style in [HeaderStyle::Antigravity, HeaderStyle::GeminiCli] {
            pool.mark_rate_limited(a.id, 90_000, ModelFamily::Gemini, style, model);
        }

        let next = pool
            .get_current_or_next(ModelFamily::Gemini, model, HeaderStyle::Antigravity)
            .unwrap();
        assert_ne!(next.id, a.id);
        assert_eq!(
            pool.get(next.id).unwrap().last_switch_reason.as_deref(),
            Some("rate-limit")
        );
    }

    #[test]
    fn claude_family_has_single_quota() {
        let mut pool = pool_of(1);
        let a = pool
            .get_current_or_next(ModelFamily::Claude, None, HeaderStyle::Antigravity)
            .unwrap();
        pool.mark_rate_limited(
            a.id,
            60_000,
            ModelFamily::Claude,
            HeaderStyle::Antigravity,
            Some("claude-sonnet-4-5"),
        );

        let a_ref = pool.get(a.id).unwrap();
        assert!(pool.is_rate_limited(a_ref, ModelFamily::Claude, None));
        assert_eq!(pool.available_style(a.id, ModelFamily::Claude, None), None);
        assert!(
            pool.get_current_or_next(ModelFamily::Claude, None, HeaderStyle::Antigravity)
                .is_none()
        );
    }

    #[test]
    fn min_wait_is_zero_with_capacity_and_bounded_without() {
        let mut pool = pool_of(1);
        assert_eq!(pool.min_wait_ms(ModelFamily::Gemini, None), 0);

        let a = pool
            .get_current_or_next(ModelFamily::Gemini, None, HeaderStyle::Antigravity)
            .unwrap();
        pool.mark_rate_limited(a.id, 90_000, ModelFamily::Gemini, HeaderStyle::Antigravity, None);
        pool.mark_rate_limited(a.id, 30_000, ModelFamily::Gemini, HeaderStyle::GeminiCli, None);

        let wait = pool.min_wait_ms(ModelFamily::Gemini, None);
        assert!(wait > 0 && wait <= 30_000, "wait = {wait}");
    }

    #[test]
    fn min_wait_falls_back_when_only_cooldown_holds() {
        let mut pool = pool_of(1);
        let id = pool.accounts()[0].id;
        pool.mark_cooling_down(id, 45_000, "auth-failure");

        let wait = pool.min_wait_ms(ModelFamily::Gemini, None);
        assert!(wait > 0 && wait <= 45_000, "wait = {wait}");
    }

    #[test]
    fn dedup_window_ignores_rapid_re_marks() {
        let mut pool = pool_of(1);
        let id = pool.accounts()[0].id;

        pool.mark_rate_limited(id, 90_000, ModelFamily::Gemini, HeaderStyle::Antigravity, None);
        let first = pool.get(id).unwrap().reset_for(
            ModelFamily::Gemini,
            HeaderStyle::Antigravity,
            None,
        );

        pool.mark_rate_limited(id, 1_000, ModelFamily::Gemini, HeaderStyle::Antigravity, None);
        let second = pool.get(id).unwrap().reset_for(
            ModelFamily::Gemini,
            HeaderStyle::Antigravity,
            None,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn capacity_ladder_escalates_only_without_hints() {
        let mut pool = pool_of(1);
        let id = pool.accounts()[0].id;

        assert_eq!(
            pool.resolve_retry_delay(
                id,
                ModelFamily::Gemini,
                HeaderStyle::Antigravity,
                None,
                Some(42_000)
            ),
            42_000
        );

        let ladder: Vec<u64> = (0..6)
            .map(|_| {
                pool.resolve_retry_delay(id, ModelFamily::Gemini, HeaderStyle::Antigravity, None, None)
            })
            .collect();
        assert_eq!(ladder, vec![5_000, 10_000, 20_000, 30_000, 60_000, 60_000]);

        pool.record_success(id);
        assert_eq!(
            pool.resolve_retry_delay(id, ModelFamily::Gemini, HeaderStyle::Antigravity, None, None),
            5_000
        );
    }

    #[test]
    fn failure_streak_triggers_cooldown() {
        let mut pool = pool_of(1);
        let id = pool.accounts()[0].id;

        for _ in 0..wire::MAX_CONSECUTIVE_FAILURES {
            pool.record_failure(id, "network-error");
        }
        let account = pool.get(id).unwrap();
        assert!(account.cooling_down_until.is_some());
        assert_eq!(account.cooldown_reason.as_deref(), Some("network-error"));
    }

    #[test]
    fn remove_reindexes_and_clamps_active() {
        let mut pool = pool_of(3);
        pool.set_active_index(ModelFamily::Gemini, 2);
        let last_id = pool.accounts()[2].id;

        pool.remove(last_id).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.accounts()[1].index, 1);
        assert!(pool.active_index(ModelFamily::Gemini) < pool.len());
    }

    #[test]
    fn refresh_rotation_preserves_project_fields() {
        let doc = StoredAccounts {
            accounts: vec![StoredAccount::new(
                Some("a@example.com".to_string()),
                "rt-old".to_string(),
                Some("proj-1".to_string()),
                None,
            )],
            ..StoredAccounts::default()
        };
        let mut pool = AccountPool::from_stored(doc);
        let id = pool.accounts()[0].id;

        let auth = AuthDetails {
            refresh: "rt-new|proj-1".to_string(),
            access: "at".to_string(),
            expires: 1,
            email: Some("a@example.com".to_string()),
        };
        pool.update_after_refresh(id, &auth);

        let account = pool.get(id).unwrap();
        assert_eq!(account.refresh_token, "rt-new");
        assert_eq!(account.project_id.as_deref(), Some("proj-1"));
    }

    #[test]
    fn stored_roundtrip_keeps_base_keys_only() {
        let mut pool = pool_of(1);
        let id = pool.accounts()[0].id;
        pool.mark_rate_limited(id, 60_000, ModelFamily::Gemini, HeaderStyle::Antigravity, None);
        pool.mark_rate_limited(
            id,
            60_000,
            ModelFamily::Gemini,
            HeaderStyle::GeminiCli,
            Some("gemini-3-pro"),
        );

        let stored = pool.to_stored();
        let times = &stored.accounts[0].rate_limit_reset_times;
        assert!(times.gemini_antigravity.is_some());
        // Model-suffixed entries are runtime-only.
        assert!(times.gemini_cli.is_none());
    }
}
