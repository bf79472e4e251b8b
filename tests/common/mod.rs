// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use f3ociety::config::{ClientConfig, Config};
use f3ociety::db::{FirestoreDb, MemoryDb};
use f3ociety::error::{AppError, Result};
use f3ociety::middleware::auth::create_jwt;
use f3ociety::models::{Session, UserRecord};
use f3ociety::routes::create_router;
use f3ociety::services::user_sync::{DatabaseSync, SyncRequest, SyncResponse};
use f3ociety::services::wallet::{
    challenge_message, WalletChallenge, WalletConnection, WalletVerifyRequest,
};
use f3ociety::services::{
    AuthOrchestrator, AuthProvider, MemoryCache, Navigator, Notice, Notifier, OrchestratorDeps,
    ProfileCache, Route, SessionStore, SyncBackend, WalletAuthBackend, WalletProvider,
};
use f3ociety::AppState;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Check if emulator is available via environment variable.
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

// ─── Records ─────────────────────────────────────────────────

pub fn session(subject_id: &str) -> Session {
    Session {
        subject_id: subject_id.to_string(),
        access_token: format!("token-{}", subject_id),
        refresh_token: None,
        expires_at: None,
        user_metadata: serde_json::Value::Null,
    }
}

pub fn user(id: &str, username: &str, display_name: &str) -> UserRecord {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "username": username,
        "display_name": display_name,
        "join_date": "2026-01-01T00:00:00Z",
    }))
    .unwrap()
}

pub fn complete_user(id: &str) -> UserRecord {
    user(id, &format!("real_{}", id), "Real Name")
}

// ─── Functions server ────────────────────────────────────────

/// Create a test app backed by an in-memory database.
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<MemoryDb>) {
    let db = Arc::new(MemoryDb::new());
    let state = Arc::new(AppState::new(Config::test_default(), db.clone()));
    (create_router(state.clone()), state, db)
}

/// Session token for `subject_id` signed with the test key.
pub fn bearer_for(state: &AppState, subject_id: &str) -> String {
    create_jwt(
        subject_id,
        None,
        &state.config.jwt_signing_key,
        Duration::from_secs(3600),
    )
    .unwrap()
    .0
}

// ─── Auth provider ───────────────────────────────────────────

#[derive(Default)]
pub struct FakeAuthProvider {
    persisted: Mutex<Option<Session>>,
    accounts: Mutex<HashMap<String, (String, Session)>>,
    codes: Mutex<HashMap<String, Session>>,
    sign_outs: AtomicUsize,
}

impl FakeAuthProvider {
    pub fn add_account(&self, email: &str, password: &str, session: Session) {
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), session));
    }

    pub fn add_oauth_code(&self, code: &str, session: Session) {
        self.codes.lock().unwrap().insert(code.to_string(), session);
    }

    pub fn persisted(&self) -> Option<Session> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.persisted())
    }

    async fn persist_session(&self, session: &Session) -> Result<()> {
        *self.persisted.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let account = self.accounts.lock().unwrap().get(email).cloned();
        match account {
            Some((expected, session)) if expected == password => {
                *self.persisted.lock().unwrap() = Some(session.clone());
                Ok(session)
            }
            _ => Err(AppError::AuthRejected(
                "Invalid login credentials".to_string(),
            )),
        }
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _metadata: serde_json::Value,
    ) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String> {
        Ok(format!(
            "https://auth.test/authorize?provider={}&redirect_to={}",
            provider, redirect_to
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<Session> {
        let session = self
            .codes
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| AppError::AuthRejected("Invalid or expired code".to_string()))?;
        *self.persisted.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self, _session: &Session) -> Result<()> {
        *self.persisted.lock().unwrap() = None;
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Navigator / notifier ────────────────────────────────────

pub struct RecordingNavigator {
    current: Mutex<Route>,
    history: Mutex<Vec<Route>>,
    delay: Duration,
}

impl RecordingNavigator {
    pub fn new(start: Route) -> Self {
        Self::with_delay(start, Duration::ZERO)
    }

    /// Navigation takes `delay` before the route changes.
    pub fn with_delay(start: Route, delay: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            history: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn navigations(&self) -> Vec<Route> {
        self.history.lock().unwrap().clone()
    }

    pub fn set_route(&self, route: Route) {
        *self.current.lock().unwrap() = route;
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Route {
        self.current.lock().unwrap().clone()
    }

    async fn navigate(&self, route: Route) {
        self.history.lock().unwrap().push(route.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.current.lock().unwrap() = route;
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

// ─── Sync backend ────────────────────────────────────────────

/// Database-backed sync with knobs for failures, latency and holding calls.
pub struct ScriptedSync {
    inner: DatabaseSync,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedSync {
    pub fn new(db: Arc<MemoryDb>) -> Self {
        Self {
            inner: DatabaseSync::new(db),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            gate: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Calls block until `release`.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    /// Wait until at least `n` calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("sync was never called");
    }
}

#[async_trait]
impl SyncBackend for ScriptedSync {
    async fn sync_user(&self, access_token: &str, request: &SyncRequest) -> Result<SyncResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Backend("connection refused".to_string()));
        }
        self.inner.sync_user(access_token, request).await
    }
}

// ─── Client harness ──────────────────────────────────────────

pub struct Harness {
    pub db: Arc<MemoryDb>,
    pub cache: Arc<MemoryCache>,
    pub auth: Arc<FakeAuthProvider>,
    pub sessions: Arc<SessionStore>,
    pub sync: Arc<ScriptedSync>,
    pub navigator: Arc<RecordingNavigator>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<AuthOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::at(Route::Home)
    }

    pub fn at(route: Route) -> Self {
        Self::build(
            ClientConfig::test_default(),
            Arc::new(RecordingNavigator::new(route)),
        )
    }

    pub fn build(config: ClientConfig, navigator: Arc<RecordingNavigator>) -> Self {
        let db = Arc::new(MemoryDb::new());
        let cache = Arc::new(MemoryCache::new());
        let auth = Arc::new(FakeAuthProvider::default());
        let sessions = Arc::new(SessionStore::new(auth.clone()));
        let sync = Arc::new(ScriptedSync::new(db.clone()));
        let notifier = Arc::new(RecordingNotifier::default());

        let orchestrator = Arc::new(AuthOrchestrator::new(
            OrchestratorDeps {
                sessions: sessions.clone(),
                sync_backend: sync.clone(),
                users: db.clone(),
                cache: cache.clone(),
                navigator: navigator.clone(),
                notifier: notifier.clone(),
            },
            &config,
        ));

        Self {
            db,
            cache,
            auth,
            sessions,
            sync,
            navigator,
            notifier,
            orchestrator,
        }
    }

    pub fn profile(&self) -> &ProfileCache {
        self.orchestrator.profile_cache()
    }

    /// Exactly one flag is set and it agrees with the cached record.
    pub fn assert_flags_match_cached_user(&self) {
        let profile = self.profile();
        let user = profile.cached_user().expect("no cached user");
        let complete = f3ociety::services::is_complete(&user);

        assert_ne!(
            profile.setup_complete_flag(),
            profile.needs_setup_flag(),
            "exactly one flag must be set"
        );
        assert_eq!(profile.setup_complete_flag(), complete);
    }
}

// ─── Wallet ──────────────────────────────────────────────────

/// Wallet extension with a fixed Ed25519 key.
pub struct FakeWallet {
    key: Ed25519KeyPair,
    /// Signs with this key instead, if set
    impostor: Option<Ed25519KeyPair>,
    installed: bool,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self {
            key: Ed25519KeyPair::from_seed_unchecked(&[7u8; 32]).unwrap(),
            impostor: None,
            installed: true,
        }
    }

    pub fn not_installed() -> Self {
        Self {
            installed: false,
            ..Self::new()
        }
    }

    pub fn signing_with_wrong_key() -> Self {
        Self {
            impostor: Some(Ed25519KeyPair::from_seed_unchecked(&[9u8; 32]).unwrap()),
            ..Self::new()
        }
    }

    pub fn address(&self) -> String {
        hex::encode(self.key.public_key().as_ref())
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    fn is_installed(&self) -> bool {
        self.installed
    }

    async fn connect(&self) -> Result<WalletConnection> {
        Ok(WalletConnection {
            public_key: self.address(),
        })
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let key = self.impostor.as_ref().unwrap_or(&self.key);
        Ok(key.sign(message).as_ref().to_vec())
    }
}

/// Wallet backend that accepts any signature.
pub enum MockWalletBackend {
    /// Hands out this session, as for a user seen for the first time
    NewUser(Session),
    Rejects,
    NetworkDown,
}

#[async_trait]
impl WalletAuthBackend for MockWalletBackend {
    async fn request_challenge(&self, address: &str) -> Result<WalletChallenge> {
        Ok(WalletChallenge {
            address: address.to_string(),
            nonce: "nonce-1".to_string(),
            message: challenge_message(address, "nonce-1"),
        })
    }

    async fn verify_signature(&self, _request: &WalletVerifyRequest) -> Result<Session> {
        match self {
            MockWalletBackend::NewUser(session) => Ok(session.clone()),
            MockWalletBackend::Rejects => Err(AppError::WalletRejected(
                "Signature verification failed".to_string(),
            )),
            MockWalletBackend::NetworkDown => {
                Err(AppError::Backend("connection reset".to_string()))
            }
        }
    }
}
