// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local durable cache and the profile flags kept in it.
//!
//! `LocalCache` is the raw string key/value store (memory for tests, a JSON
//! file for a persistent client). `ProfileCache` is the typed view the auth
//! orchestrator and the user sync service write through. It keeps the two
//! setup flags derived from the cached user record and fences off writes from
//! syncs that belong to a session that has since ended.

use crate::error::{AppError, Result};
use crate::models::UserRecord;
use crate::services::completeness::Verdict;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Cache key names.
pub mod keys {
    /// Serialized last-known user record
    pub const USER: &str = "f3ociety_user";
    /// When `USER` was written (RFC 3339)
    pub const USER_CACHED_AT: &str = "f3ociety_user_cached_at";
    pub const PROFILE_SETUP_COMPLETE: &str = "profile_setup_complete";
    pub const NEEDS_PROFILE_SETUP: &str = "needs_profile_setup";
    /// Serialized auth session (access and refresh tokens)
    pub const SESSION: &str = "f3ociety_session";
    /// PKCE verifier of an OAuth sign-in in progress
    pub const OAUTH_CODE_VERIFIER: &str = "f3ociety_oauth_code_verifier";
    /// Last connected wallet address
    pub const WALLET_ADDRESS: &str = "wallet_address";
}

const FLAG_SET: &str = "true";

/// Synchronous string key/value store that survives reloads.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-memory cache (tests, ephemeral clients).
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Cache persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file (write to a temp file, then rename).
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileCache {
    /// Open the cache at `path`, starting empty if the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt cache file, starting empty");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(AppError::Cache(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Cache("Cache lock poisoned".to_string()))
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Cache(format!("Failed to create cache dir: {}", e)))?;
        }

        let json = serde_json::to_string(entries)
            .map_err(|e| AppError::Cache(format!("Failed to serialize cache: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| AppError::Cache(format!("Failed to write {}: {}", self.path.display(), e)))
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self.lock()?;
        entries.clear();
        self.persist(&entries)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProfileCache - typed profile entries with write fencing
// ─────────────────────────────────────────────────────────────────────────────

/// Permission to write profile entries on behalf of one session.
///
/// Issued by [`ProfileCache::begin`]; becomes stale when the user signs out or
/// a different subject signs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTicket {
    subject_id: String,
    epoch: u64,
}

impl CacheTicket {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

#[derive(Default)]
struct FenceState {
    epoch: u64,
    subject_id: Option<String>,
}

/// Typed access to the profile entries of a [`LocalCache`].
#[derive(Clone)]
pub struct ProfileCache {
    store: Arc<dyn LocalCache>,
    fence: Arc<Mutex<FenceState>>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn LocalCache>) -> Self {
        Self {
            store,
            fence: Arc::new(Mutex::new(FenceState::default())),
        }
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Last-known user record, if present and parseable.
    pub fn cached_user(&self) -> Option<UserRecord> {
        let raw = self.store.get(keys::USER)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable cached user");
                None
            }
        }
    }

    /// Cached user record, only if it belongs to `subject_id`.
    pub fn cached_user_for(&self, subject_id: &str) -> Option<UserRecord> {
        self.cached_user().filter(|user| user.id == subject_id)
    }

    pub fn setup_complete_flag(&self) -> bool {
        self.store.get(keys::PROFILE_SETUP_COMPLETE).as_deref() == Some(FLAG_SET)
    }

    pub fn needs_setup_flag(&self) -> bool {
        self.store.get(keys::NEEDS_PROFILE_SETUP).as_deref() == Some(FLAG_SET)
    }

    /// When the cached user record was written.
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(keys::USER_CACHED_AT)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.store.get(keys::WALLET_ADDRESS)
    }

    // ─── Fencing ─────────────────────────────────────────────────

    fn fence(&self) -> Result<std::sync::MutexGuard<'_, FenceState>> {
        self.fence
            .lock()
            .map_err(|_| AppError::Cache("Cache fence poisoned".to_string()))
    }

    /// Issue a write ticket for `subject_id`.
    ///
    /// A subject change invalidates tickets issued for the previous subject.
    pub fn begin(&self, subject_id: &str) -> CacheTicket {
        // A poisoned fence only means a writer panicked; the counter is still usable.
        let mut state = self.fence.lock().unwrap_or_else(|p| p.into_inner());
        if state.subject_id.as_deref() != Some(subject_id) {
            state.epoch += 1;
            state.subject_id = Some(subject_id.to_string());
        }
        CacheTicket {
            subject_id: subject_id.to_string(),
            epoch: state.epoch,
        }
    }

    /// True while no sign-out or subject change happened since `ticket` was issued.
    pub fn is_current(&self, ticket: &CacheTicket) -> bool {
        self.fence
            .lock()
            .map(|state| Self::ticket_matches(&state, ticket))
            .unwrap_or(false)
    }

    fn ticket_matches(state: &FenceState, ticket: &CacheTicket) -> bool {
        state.epoch == ticket.epoch && state.subject_id.as_deref() == Some(&ticket.subject_id)
    }

    // ─── Writes ──────────────────────────────────────────────────

    /// Store `user` and rewrite both flags from its verdict.
    ///
    /// Exactly one of the flags is set afterwards. Returns `Superseded` if the
    /// ticket is stale; nothing is written in that case.
    pub(crate) fn store_user(&self, ticket: &CacheTicket, user: &UserRecord) -> Result<Verdict> {
        let state = self.fence()?;
        if !Self::ticket_matches(&state, ticket) {
            return Err(AppError::Superseded);
        }
        if user.id != ticket.subject_id {
            return Err(AppError::Internal(anyhow::anyhow!(
                "User record {} does not belong to session subject {}",
                user.id,
                ticket.subject_id
            )));
        }

        let verdict = Verdict::of(user);
        let json = serde_json::to_string(user)
            .map_err(|e| AppError::Cache(format!("Failed to serialize user: {}", e)))?;

        let result = self.write_user_entries(&json, verdict);
        if result.is_err() {
            // Never leave flags that disagree with the record next to them.
            let _ = self.store.remove(keys::PROFILE_SETUP_COMPLETE);
            let _ = self.store.remove(keys::NEEDS_PROFILE_SETUP);
            let _ = self.store.remove(keys::USER);
        }
        result.map(|_| verdict)
    }

    fn write_user_entries(&self, json: &str, verdict: Verdict) -> Result<()> {
        self.store.set(keys::USER, json)?;
        self.store
            .set(keys::USER_CACHED_AT, &format_utc_rfc3339(Utc::now()))?;
        self.write_flags(verdict)
    }

    /// Rewrite the flags from an already cached record without touching its timestamp.
    ///
    /// Used when the backend is unreachable and the cached record is all we have.
    pub(crate) fn reconcile_flags(&self, ticket: &CacheTicket, user: &UserRecord) -> Result<Verdict> {
        let state = self.fence()?;
        if !Self::ticket_matches(&state, ticket) {
            return Err(AppError::Superseded);
        }
        let verdict = Verdict::of(user);
        self.write_flags(verdict)?;
        Ok(verdict)
    }

    fn write_flags(&self, verdict: Verdict) -> Result<()> {
        let (set, clear) = match verdict {
            Verdict::Complete => (keys::PROFILE_SETUP_COMPLETE, keys::NEEDS_PROFILE_SETUP),
            Verdict::SetupNeeded => (keys::NEEDS_PROFILE_SETUP, keys::PROFILE_SETUP_COMPLETE),
        };
        self.store.remove(clear)?;
        self.store.set(set, FLAG_SET)
    }

    pub(crate) fn store_wallet_address(&self, ticket: &CacheTicket, address: &str) -> Result<()> {
        let state = self.fence()?;
        if !Self::ticket_matches(&state, ticket) {
            return Err(AppError::Superseded);
        }
        self.store.set(keys::WALLET_ADDRESS, address)
    }

    /// Remove every entry and invalidate all outstanding tickets.
    pub fn invalidate(&self) -> Result<()> {
        let mut state = self.fence()?;
        state.epoch += 1;
        state.subject_id = None;
        self.store.clear()
    }
}
