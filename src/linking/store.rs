//! State and credential stores.
//!
//! Both stores use DashMap for concurrent access. Pending authorizations
//! live in memory only; linked credentials are persisted to a JSON file on
//! disk when `data_dir` is configured.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::types::{CredentialUpdate, LinkedCredential, PendingAuthorization, Provider};
use crate::error::{LinkError, Result};

/// Storage for pending authorizations, keyed by state token.
pub trait StateStore: Send + Sync {
    /// Record a new pending authorization. Fails if the token is taken.
    fn insert(&self, pending: PendingAuthorization) -> Result<()>;

    /// Atomically remove and return a pending authorization.
    ///
    /// Returns `None` if the token is unknown, already taken, or expired.
    /// Of several concurrent callers with the same token, at most one gets
    /// `Some`.
    fn take(&self, state_token: &str) -> Option<PendingAuthorization>;

    /// Drop every record older than the TTL. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of pending authorizations.
    fn len(&self) -> usize;
}

/// Storage for linked credentials, keyed by `(user_id, provider)`.
pub trait TokenStore: Send + Sync {
    fn get(&self, user_id: &str, provider: Provider) -> Option<LinkedCredential>;

    /// Merge `update` into the stored credential (or create it) and return
    /// the result.
    fn upsert(
        &self,
        user_id: &str,
        provider: Provider,
        update: CredentialUpdate,
    ) -> Result<LinkedCredential>;

    /// Number of stored credentials.
    fn len(&self) -> usize;
}

// ── Pending Authorizations ───────────────────────────────────────────────────

/// In-memory pending-authorization store with age-based expiry.
#[derive(Clone)]
pub struct MemoryStateStore {
    /// state_token → PendingAuthorization
    pending: Arc<DashMap<String, PendingAuthorization>>,
    ttl_secs: i64,
}

impl MemoryStateStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl_secs,
        }
    }
}

impl StateStore for MemoryStateStore {
    fn insert(&self, pending: PendingAuthorization) -> Result<()> {
        match self.pending.entry(pending.state_token.clone()) {
            Entry::Occupied(_) => Err(LinkError::Internal(
                "state token collision".to_string(),
            )),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    provider = %pending.provider,
                    user_id = pending.user_id.as_str(),
                    "Storing pending authorization"
                );
                slot.insert(pending);
                Ok(())
            }
        }
    }

    fn take(&self, state_token: &str) -> Option<PendingAuthorization> {
        let (_, pending) = match self.pending.remove(state_token) {
            Some(found) => found,
            None => {
                tracing::warn!(
                    pending_states = self.pending.len(),
                    "Pending authorization not found"
                );
                return None;
            }
        };

        let now = Utc::now();
        if pending.is_expired(now, self.ttl_secs) {
            tracing::warn!(
                provider = %pending.provider,
                age_secs = pending.age_secs(now),
                "Pending authorization expired"
            );
            return None;
        }

        Some(pending)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| !pending.is_expired(now, self.ttl_secs));
        before.saturating_sub(self.pending.len())
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

// ── Linked Credentials ───────────────────────────────────────────────────────

/// On-disk persistence format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCredentials {
    credentials: Vec<LinkedCredential>,
}

/// Credential store with optional JSON file persistence.
#[derive(Clone)]
pub struct CredentialStore {
    credentials: Arc<DashMap<(String, Provider), LinkedCredential>>,
    /// Serializes writers of the data file.
    persist_lock: Arc<Mutex<()>>,
    /// Directory for persistence. None = in-memory only.
    data_dir: Option<PathBuf>,
}

impl CredentialStore {
    pub fn new(data_dir: Option<&str>) -> Self {
        Self {
            credentials: Arc::new(DashMap::new()),
            persist_lock: Arc::new(Mutex::new(())),
            data_dir: data_dir.map(PathBuf::from),
        }
    }

    /// Path to the credentials file.
    fn data_file_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("credentials.json"))
    }

    /// Load credentials from disk.
    ///
    /// Called once at startup. A missing or corrupt file is logged and the
    /// store starts empty.
    pub fn load_from_disk(&self) -> usize {
        let path = match self.data_file_path() {
            Some(p) => p,
            None => {
                tracing::info!("No data_dir configured, credentials kept in memory only");
                return 0;
            }
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "No existing credentials file, starting fresh");
            return 0;
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read credentials file, starting fresh"
                );
                return 0;
            }
        };

        match serde_json::from_str::<PersistedCredentials>(&contents) {
            Ok(data) => {
                let count = data.credentials.len();
                for credential in data.credentials {
                    self.credentials
                        .insert((credential.user_id.clone(), credential.provider), credential);
                }
                tracing::info!(
                    credentials = count,
                    path = %path.display(),
                    "Credentials loaded from disk"
                );
                count
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse credentials file, starting fresh"
                );
                0
            }
        }
    }

    /// Persist all credentials.
    ///
    /// Writes a temp file and renames it over the data file.
    fn persist_to_disk(&self) -> Result<()> {
        let path = match self.data_file_path() {
            Some(p) => p,
            None => return Ok(()),
        };

        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let data = PersistedCredentials {
            credentials: self.credentials.iter().map(|r| r.value().clone()).collect(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| LinkError::Internal(format!("serialize credentials: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LinkError::Internal(format!("create {}: {}", parent.display(), e))
            })?;
        }

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)
            .map_err(|e| LinkError::Internal(format!("write {}: {}", tmp_path.display(), e)))?;

        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(LinkError::Internal(format!(
                "rename to {}: {}",
                path.display(),
                e
            )));
        }

        Ok(())
    }
}

impl TokenStore for CredentialStore {
    fn get(&self, user_id: &str, provider: Provider) -> Option<LinkedCredential> {
        self.credentials
            .get(&(user_id.to_string(), provider))
            .map(|c| c.clone())
    }

    fn upsert(
        &self,
        user_id: &str,
        provider: Provider,
        update: CredentialUpdate,
    ) -> Result<LinkedCredential> {
        let key = (user_id.to_string(), provider);
        let (stored, previous) = match self.credentials.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let previous = slot.get().clone();
                let merged = update.apply(Some(previous.clone()), user_id, provider);
                slot.insert(merged.clone());
                (merged, Some(previous))
            }
            Entry::Vacant(slot) => {
                let created = update.apply(None, user_id, provider);
                slot.insert(created.clone());
                (created, None)
            }
        }; // Release DashMap lock before I/O

        if let Err(e) = self.persist_to_disk() {
            // Memory must not hold a credential the data file lacks.
            match previous {
                Some(previous) => {
                    self.credentials.insert(key, previous);
                }
                None => {
                    self.credentials.remove(&key);
                }
            }
            return Err(e);
        }

        Ok(stored)
    }

    fn len(&self) -> usize {
        self.credentials.len()
    }
}
