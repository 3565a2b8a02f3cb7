use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Storage schema version for migration support.
pub const STORAGE_VERSION: u32 = 3;

/// Rate limit reset times for the persisted base quota keys.
///
/// Model-suffixed keys are runtime-only; only the three base quotas survive a
/// round trip to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitResetTimes {
    pub claude: Option<i64>,
    #[serde(rename = "gemini-antigravity")]
    pub gemini_antigravity: Option<i64>,
    #[serde(rename = "gemini-cli")]
    pub gemini_cli: Option<i64>,
}

/// Metadata for a single stored identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    pub refresh_token: String,
    pub email: Option<String>,
    pub project_id: Option<String>,
    pub managed_project_id: Option<String>,
    #[serde(default = "now_ms")]
    pub added_at: i64,
    #[serde(default = "now_ms")]
    pub last_used: i64,
    /// "rate-limit", "initial" or "rotation".
    #[serde(default)]
    pub last_switch_reason: Option<String>,
    #[serde(default)]
    pub rate_limit_reset_times: RateLimitResetTimes,
    #[serde(default)]
    pub cooling_down_until: Option<i64>,
    /// "auth-failure", "network-error" or "project-error".
    #[serde(default)]
    pub cooldown_reason: Option<String>,
}

impl StoredAccount {
    pub fn new(
        email: Option<String>,
        refresh_token: String,
        project_id: Option<String>,
        managed_project_id: Option<String>,
    ) -> Self {
        let now = now_ms();
        StoredAccount {
            refresh_token,
            email,
            project_id,
            managed_project_id,
            added_at: now,
            last_used: now,
            last_switch_reason: None,
            rate_limit_reset_times: RateLimitResetTimes::default(),
            cooling_down_until: None,
            cooldown_reason: None,
        }
    }
}

/// Per-family active identity index.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveIndexByFamily {
    #[serde(default)]
    pub claude: usize,
    #[serde(default)]
    pub gemini: usize,
}

/// Container for all stored identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccounts {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub accounts: Vec<StoredAccount>,
    #[serde(default)]
    pub active_index: usize,
    #[serde(default)]
    pub active_index_by_family: ActiveIndexByFamily,
}

impl Default for StoredAccounts {
    fn default() -> Self {
        StoredAccounts {
            version: STORAGE_VERSION,
            accounts: Vec::new(),
            active_index: 0,
            active_index_by_family: ActiveIndexByFamily::default(),
        }
    }
}

fn default_version() -> u32 {
    STORAGE_VERSION
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Deduplicate accounts by email, keeping the newest one (highest `lastUsed`,
/// then `addedAt`). Accounts without email are preserved as-is, after the
/// deduplicated ones.
pub fn deduplicate_by_email(accounts: Vec<StoredAccount>) -> Vec<StoredAccount> {
    let mut by_email: Vec<StoredAccount> = Vec::new();
    let mut no_email: Vec<StoredAccount> = Vec::new();

    for account in accounts {
        let Some(email) = account.email.clone() else {
            no_email.push(account);
            continue;
        };

        match by_email
            .iter_mut()
            .find(|existing| existing.email.as_deref() == Some(email.as_str()))
        {
            None => by_email.push(account),
            Some(existing) => {
                let newer = account.last_used > existing.last_used
                    || (account.last_used == existing.last_used
                        && account.added_at > existing.added_at);
                if newer {
                    *existing = account;
                }
            }
        }
    }

    by_email.extend(no_email);
    by_email
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn on_disk_field_names_are_camel_case() {
        let doc = StoredAccounts {
            accounts: vec![StoredAccount::new(
                Some("a@example.com".to_string()),
                "rt|proj-1".to_string(),
                Some("proj-1".to_string()),
                None,
            )],
            ..StoredAccounts::default()
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["version"], json!(3));
        let account = &value["accounts"][0];
        assert!(account.get("refreshToken").is_some());
        assert!(account.get("rateLimitResetTimes").is_some());
        assert!(account["rateLimitResetTimes"].get("gemini-antigravity").is_some());
        assert!(value.get("activeIndexByFamily").is_some());
    }

    #[test]
    fn missing_fields_fill_defaults() {
        let doc: StoredAccounts = serde_json::from_value(json!({
            "accounts": [{"refreshToken": "rt", "email": null,
                          "projectId": null, "managedProjectId": null}]
        }))
        .unwrap();

        assert_eq!(doc.version, STORAGE_VERSION);
        assert_eq!(doc.accounts.len(), 1);
        assert!(doc.accounts[0].added_at > 0);
        assert_eq!(doc.active_index_by_family.gemini, 0);
    }

    #[test]
    fn dedup_keeps_newest_by_last_used_then_added_at() {
        let mut older = StoredAccount::new(
            Some("dup@example.com".to_string()),
            "old".to_string(),
            None,
            None,
        );
        older.last_used = 10;
        older.added_at = 10;

        let mut newer = older.clone();
        newer.refresh_token = "new".to_string();
        newer.last_used = 20;

        let anon = StoredAccount::new(None, "anon".to_string(), None, None);

        let deduped = deduplicate_by_email(vec![older, anon.clone(), newer]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].refresh_token, "new");
        assert_eq!(deduped[1].refresh_token, "anon");
    }
}
