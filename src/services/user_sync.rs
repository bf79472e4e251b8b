// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User sync: map a session subject to its application user record.
//!
//! Handles:
//! - Fetch-or-create keyed on the subject id (seeded from provider metadata)
//! - Cached fast path when the profile is known to be complete
//! - Per-subject serialization so concurrent triggers share one round-trip
//! - Writing the result to the profile cache through a fenced ticket

use crate::db::UserDatabase;
use crate::error::{AppError, Result};
use crate::models::{ProviderMetadata, Session, UserPatch, UserRecord};
use crate::services::cache::{CacheTicket, ProfileCache};
use crate::services::completeness::{self, Verdict};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Request body of the `sync-auth-user` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub user_id: String,
    #[serde(default)]
    pub force_sync: bool,
    /// Provider metadata used to seed a new record
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// Wallet to link to the record, if the sign-in came from a wallet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// Response body of the `sync-auth-user` function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub needs_profile_setup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    pub fn for_user(user: UserRecord) -> Self {
        Self {
            success: true,
            needs_profile_setup: Verdict::of(&user).needs_setup(),
            user: Some(user),
            error: None,
        }
    }
}

/// Whatever runs fetch-or-create for the client.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn sync_user(&self, access_token: &str, request: &SyncRequest) -> Result<SyncResponse>;
}

/// Record for a subject seen for the first time.
pub fn seed_user(
    subject_id: &str,
    metadata: &ProviderMetadata,
    wallet_address: Option<String>,
    now: DateTime<Utc>,
) -> UserRecord {
    UserRecord {
        id: subject_id.to_string(),
        username: completeness::placeholder_username(subject_id),
        display_name: metadata
            .display_name
            .clone()
            .unwrap_or_else(|| completeness::PLACEHOLDER_DISPLAY_NAME.to_string()),
        avatar_url: metadata.avatar_url.clone(),
        header_url: None,
        bio: None,
        join_date: format_utc_rfc3339(now),
        verified: false,
        following: Vec::new(),
        followers: Vec::new(),
        wallet_address,
    }
}

/// Fetch the record for `request.user_id`, creating it on first sight.
///
/// Safe to call concurrently: a creation conflict means another caller won,
/// and its record is read back.
pub async fn fetch_or_create_user(
    db: &dyn UserDatabase,
    request: &SyncRequest,
) -> Result<UserRecord> {
    let subject_id = request.user_id.as_str();

    if let Some(user) = db.get_user_by_id(subject_id).await? {
        return link_missing_fields(db, user, request).await;
    }

    let metadata = ProviderMetadata::from_json(&request.metadata);
    let seed = seed_user(subject_id, &metadata, request.wallet_address.clone(), Utc::now());

    match db.create_user(&seed).await {
        Ok(user) => {
            tracing::info!(subject_id, username = %user.username, "Created user record");
            Ok(user)
        }
        Err(AppError::Conflict(_)) => {
            tracing::debug!(subject_id, "User created concurrently, reading it back");
            let user = db
                .get_user_by_id(subject_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {}", subject_id)))?;
            link_missing_fields(db, user, request).await
        }
        Err(e) => Err(e),
    }
}

/// Fill in a wallet address or avatar the existing record does not have yet.
async fn link_missing_fields(
    db: &dyn UserDatabase,
    user: UserRecord,
    request: &SyncRequest,
) -> Result<UserRecord> {
    let mut patch = UserPatch::default();

    if user.wallet_address.is_none() {
        patch.wallet_address = request.wallet_address.clone();
    }
    if user.avatar_url.is_none() {
        patch.avatar_url = ProviderMetadata::from_json(&request.metadata).avatar_url;
    }

    if patch.is_empty() {
        return Ok(user);
    }
    db.update_user(&user.id, &patch).await
}

/// Sync backend that talks to a database directly.
pub struct DatabaseSync {
    db: Arc<dyn UserDatabase>,
}

impl DatabaseSync {
    pub fn new(db: Arc<dyn UserDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncBackend for DatabaseSync {
    async fn sync_user(&self, _access_token: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let user = fetch_or_create_user(self.db.as_ref(), request).await?;
        Ok(SyncResponse::for_user(user))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UserSyncService - client-side sync with cache fast path
// ─────────────────────────────────────────────────────────────────────────────

/// Extra inputs for a sync.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Skip the cached fast path
    pub force: bool,
    pub wallet_address: Option<String>,
}

/// Result of a sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub user: UserRecord,
    pub verdict: Verdict,
    /// True if no network round-trip was made
    pub from_cache: bool,
}

impl SyncOutcome {
    pub fn needs_profile_setup(&self) -> bool {
        self.verdict.needs_setup()
    }
}

pub struct UserSyncService {
    backend: Arc<dyn SyncBackend>,
    cache: ProfileCache,
    revalidate_after: Duration,
    /// Per-subject mutex to serialize syncs.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// When the last sync per subject finished.
    completed: DashMap<String, Instant>,
}

impl UserSyncService {
    pub fn new(backend: Arc<dyn SyncBackend>, cache: ProfileCache, revalidate_after: Duration) -> Self {
        Self {
            backend,
            cache,
            revalidate_after,
            locks: DashMap::new(),
            completed: DashMap::new(),
        }
    }

    /// Cached record for `subject_id` if it may be trusted without a fetch.
    ///
    /// Requires the complete flag, a record for the same subject that still
    /// evaluates as complete, and a write inside the revalidation window.
    pub fn trusted_cached_user(&self, subject_id: &str) -> Option<UserRecord> {
        if !self.cache.setup_complete_flag() {
            return None;
        }
        let user = self.cache.cached_user_for(subject_id)?;
        if !completeness::is_complete(&user) {
            return None;
        }

        let cached_at = self.cache.cached_at()?;
        let window = chrono::Duration::from_std(self.revalidate_after).ok()?;
        if Utc::now() - cached_at > window {
            return None;
        }
        Some(user)
    }

    /// Sync the user behind `session` and write the result to the cache.
    ///
    /// This method:
    /// 1. Returns the cached record if it is trusted (unless forced)
    /// 2. Waits for any in-flight sync of the same subject
    /// 3. Reuses that sync's result if it finished while we waited
    /// 4. Otherwise calls the backend and stores the record under `ticket`
    pub async fn sync(
        &self,
        ticket: &CacheTicket,
        session: &Session,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let subject_id = session.subject_id.as_str();

        if !options.force {
            if let Some(user) = self.trusted_cached_user(subject_id) {
                tracing::debug!(subject_id, "Profile complete in cache, skipping sync");
                return Ok(Self::cached_outcome(user));
            }
        }

        let requested_at = Instant::now();
        let lock = self
            .locks
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another sync for this subject may have finished while we waited.
        let finished_meanwhile = self
            .completed
            .get(subject_id)
            .is_some_and(|done| *done >= requested_at);
        if finished_meanwhile {
            if let Some(user) = self.cache.cached_user_for(subject_id) {
                tracing::debug!(subject_id, "Reusing result of concurrent sync");
                return Ok(Self::cached_outcome(user));
            }
        }

        let request = SyncRequest {
            user_id: subject_id.to_string(),
            force_sync: options.force,
            metadata: session.user_metadata.clone(),
            wallet_address: options.wallet_address.clone(),
        };

        let response = self
            .backend
            .sync_user(&session.access_token, &request)
            .await?;

        if !response.success {
            return Err(AppError::Backend(
                response
                    .error
                    .unwrap_or_else(|| "User sync failed".to_string()),
            ));
        }

        let user = response.user.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Sync response for {} had no user", subject_id))
        })?;

        let verdict = Verdict::of(&user);
        if verdict.needs_setup() != response.needs_profile_setup {
            tracing::warn!(
                subject_id,
                server_needs_setup = response.needs_profile_setup,
                "Server verdict disagrees with local evaluation, using local"
            );
        }

        self.cache.store_user(ticket, &user)?;
        self.completed.insert(subject_id.to_string(), Instant::now());

        tracing::info!(subject_id, ?verdict, "User synced");
        Ok(SyncOutcome {
            user,
            verdict,
            from_cache: false,
        })
    }

    fn cached_outcome(user: UserRecord) -> SyncOutcome {
        SyncOutcome {
            verdict: Verdict::of(&user),
            user,
            from_cache: true,
        }
    }
}
