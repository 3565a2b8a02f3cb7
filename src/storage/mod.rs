//! Persisted identity store: a versioned JSON document guarded by a
//! cross-process lock file.
//!
//! Reads fall back to lock-free access when the lock cannot be acquired
//! within the timeout; writes are atomic (temp sibling + rename).

mod schema;

pub use schema::{
    ActiveIndexByFamily, RateLimitResetTimes, STORAGE_VERSION, StoredAccount, StoredAccounts,
    deduplicate_by_email,
};

use fs2::FileExt;
use rand::Rng as _;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::CastorError;
use schema::now_ms;

/// Env var naming a full path to the accounts file.
pub const STORAGE_PATH_ENV: &str = "CASTOR_STORAGE_PATH";
/// Env var naming the directory holding the accounts file.
pub const STORAGE_DIR_ENV: &str = "CASTOR_STORAGE_DIR";

const STORAGE_FILE_NAME: &str = "accounts.json";
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to the on-disk identity store.
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    /// Store at the default (env-overridable) location.
    pub fn from_env() -> Self {
        AccountStore {
            path: default_storage_path(),
        }
    }

    /// Store at an explicit path. Used by tests and the CLI `--storage` flag.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        AccountStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| STORAGE_FILE_NAME.into(), ToOwned::to_owned);
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn ensure_parent_dir(&self) -> Result<(), CastorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Acquire the cross-process lock, polling up to the timeout. `None`
    /// means the caller should proceed without the lock.
    fn acquire_lock(&self) -> Option<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .ok()?;

        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => return Some(lock_file),
                Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL_INTERVAL),
                Err(err) => {
                    warn!(path = %self.lock_path().display(), "storage lock not acquired: {err}");
                    return None;
                }
            }
        }
    }

    /// Load without file locking. `None` if the file is missing or invalid.
    pub fn load_unsafe(&self) -> Option<StoredAccounts> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring unreadable accounts file: {err}");
                None
            }
        }
    }

    /// Load under the lock; falls back to a lock-free read on timeout.
    pub fn load(&self) -> Option<StoredAccounts> {
        if self.ensure_parent_dir().is_err() {
            return self.load_unsafe();
        }
        // The guard releases on every exit path: fs2 locks drop with the file.
        let _guard = self.acquire_lock();
        self.load_unsafe()
    }

    /// Save under the lock with an atomic temp-sibling write. A lock timeout
    /// degrades to a direct write rather than losing the update.
    pub fn save(&self, doc: &StoredAccounts) -> Result<(), CastorError> {
        self.ensure_parent_dir()?;
        let payload = serde_json::to_string_pretty(doc)?;

        match self.acquire_lock() {
            Some(_guard) => self.write_atomic(payload.as_bytes()),
            None => Ok(fs::write(&self.path, payload.as_bytes())?),
        }
    }

    fn write_atomic(&self, payload: &[u8]) -> Result<(), CastorError> {
        let suffix: u64 = rand::rng().random();
        let mut tmp_name = self
            .path
            .file_name()
            .map_or_else(|| STORAGE_FILE_NAME.into(), ToOwned::to_owned);
        tmp_name.push(format!(".{suffix:012x}.tmp"));
        let tmp_path = self.path.with_file_name(tmp_name);

        let result = (|| {
            fs::write(&tmp_path, payload)?;
            // Windows rename does not replace; remove the target first.
            if cfg!(windows) && self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        if tmp_path.exists() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Remove all stored identities (and the file).
    pub fn clear(&self) {
        if !self.path.exists() {
            return;
        }
        let _guard = self.acquire_lock();
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to clear accounts file: {err}");
        }
    }

    /// Add a new identity or update an existing one matched by email.
    ///
    /// An email match overwrites the refresh secret, refreshes the project
    /// fields and touches `lastUsed`; otherwise the identity is appended.
    pub fn add_or_update(
        &self,
        email: Option<&str>,
        refresh_token: &str,
        project_id: Option<&str>,
        managed_project_id: Option<&str>,
    ) -> Result<StoredAccounts, CastorError> {
        let now = now_ms();
        let mut doc = self.load().unwrap_or_default();

        let existing = email.and_then(|email| {
            doc.accounts
                .iter()
                .position(|acc| acc.email.as_deref() == Some(email))
        });

        match existing {
            Some(index) => {
                let account = &mut doc.accounts[index];
                account.refresh_token = refresh_token.to_string();
                if let Some(project_id) = project_id {
                    account.project_id = Some(project_id.to_string());
                }
                if let Some(managed_project_id) = managed_project_id {
                    account.managed_project_id = Some(managed_project_id.to_string());
                }
                account.last_used = now;
            }
            None => doc.accounts.push(StoredAccount::new(
                email.map(ToString::to_string),
                refresh_token.to_string(),
                project_id.map(ToString::to_string),
                managed_project_id.map(ToString::to_string),
            )),
        }

        doc.accounts = deduplicate_by_email(std::mem::take(&mut doc.accounts));
        clamp_active_indices(&mut doc);

        self.save(&doc)?;
        debug!(count = doc.accounts.len(), "account store updated");
        Ok(doc)
    }

    /// Remove an identity by email. Returns whether anything was removed.
    pub fn remove_by_email(&self, email: &str) -> Result<bool, CastorError> {
        let Some(mut doc) = self.load() else {
            return Ok(false);
        };

        let before = doc.accounts.len();
        doc.accounts.retain(|acc| acc.email.as_deref() != Some(email));
        if doc.accounts.len() == before {
            return Ok(false);
        }

        clamp_active_indices(&mut doc);
        self.save(&doc)?;
        Ok(true)
    }

    /// Set the active identity index for both families. Returns false for an
    /// out-of-range index.
    pub fn set_active(&self, index: usize) -> Result<bool, CastorError> {
        let Some(mut doc) = self.load() else {
            return Ok(false);
        };
        if index >= doc.accounts.len() {
            return Ok(false);
        }

        doc.active_index = index;
        doc.active_index_by_family.gemini = index;
        doc.active_index_by_family.claude = index;
        self.save(&doc)?;
        Ok(true)
    }
}

fn clamp_active_indices(doc: &mut StoredAccounts) {
    let max = doc.accounts.len().saturating_sub(1);
    doc.active_index = doc.active_index.min(max);
    doc.active_index_by_family.gemini = doc.active_index_by_family.gemini.min(max);
    doc.active_index_by_family.claude = doc.active_index_by_family.claude.min(max);
}

/// Resolve the accounts file location: explicit env path, env dir, then the
/// platform config directory.
pub fn default_storage_path() -> PathBuf {
    if let Ok(path) = std::env::var(STORAGE_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir).join(STORAGE_FILE_NAME);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("castor")
        .join(STORAGE_FILE_NAME)
}
