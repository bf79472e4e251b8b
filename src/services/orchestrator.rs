// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth orchestrator: the client's authentication state machine.
//!
//! Reacts to session changes, runs the user sync, decides between the
//! profile setup screen and the main app, and performs the single redirect
//! that follows from that decision. Views observe [`AuthState`] through a
//! watch channel and never route on the cached flags themselves.

use crate::config::ClientConfig;
use crate::db::UserDatabase;
use crate::error::{AppError, Result};
use crate::models::{ProfileSetupForm, Session, UserRecord};
use crate::services::cache::{CacheTicket, LocalCache, ProfileCache};
use crate::services::completeness::{self, Verdict};
use crate::services::session::{SessionEvent, SessionStore};
use crate::services::user_sync::{SyncBackend, SyncOptions, UserSyncService};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use validator::Validate;

/// Where the client is in the sign-in lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    AuthenticatedSetupNeeded,
    AuthenticatedComplete,
}

impl AuthState {
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            AuthState::AuthenticatedSetupNeeded | AuthState::AuthenticatedComplete
        )
    }
}

impl From<Verdict> for AuthState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Complete => AuthState::AuthenticatedComplete,
            Verdict::SetupNeeded => AuthState::AuthenticatedSetupNeeded,
        }
    }
}

/// Client routes the orchestrator cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Feed,
    ProfileSetup,
    AuthCallback,
    Other(String),
}

impl Route {
    pub fn path(&self) -> &str {
        match self {
            Route::Home => "/",
            Route::Feed => "/feed",
            Route::ProfileSetup => "/profile-setup",
            Route::AuthCallback => "/auth/callback",
            Route::Other(path) => path,
        }
    }

    pub fn from_path(path: &str) -> Self {
        // Query string and fragment do not select a route.
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path.trim_end_matches('/') {
            "" => Route::Home,
            "/feed" => Route::Feed,
            "/profile-setup" => Route::ProfileSetup,
            "/auth/callback" => Route::AuthCallback,
            other => Route::Other(other.to_string()),
        }
    }
}

/// Client-side router.
#[async_trait]
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> Route;

    /// Replace the current route. Resolves once the navigation is done.
    async fn navigate(&self, route: Route);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Non-blocking message for the user (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier for headless clients: notices go to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => tracing::warn!(message = %notice.message, "User notice"),
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!(message = %notice.message, "User notice")
            }
        }
    }
}

/// Collaborators of an [`AuthOrchestrator`].
pub struct OrchestratorDeps {
    pub sessions: Arc<SessionStore>,
    pub sync_backend: Arc<dyn SyncBackend>,
    /// Used for username checks and the profile setup write
    pub users: Arc<dyn UserDatabase>,
    pub cache: Arc<dyn LocalCache>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

/// Clears the in-flight redirect when the navigation that set it finishes.
struct RedirectGuard<'a>(&'a Mutex<Option<Route>>);

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct AuthOrchestrator {
    sessions: Arc<SessionStore>,
    sync: UserSyncService,
    cache: ProfileCache,
    users: Arc<dyn UserDatabase>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<AuthState>,
    /// Target of the navigation currently being awaited.
    is_redirecting: Mutex<Option<Route>>,
    /// Serializes navigations so a later target waits for the earlier one.
    redirect_lock: AsyncMutex<()>,
    oauth_callback_timeout: Duration,
    session_retry_timeout: Duration,
}

impl AuthOrchestrator {
    pub fn new(deps: OrchestratorDeps, config: &ClientConfig) -> Self {
        let cache = ProfileCache::new(deps.cache);
        let sync = UserSyncService::new(
            deps.sync_backend,
            cache.clone(),
            config.profile_revalidate_after,
        );
        let (state, _) = watch::channel(AuthState::Unauthenticated);

        Self {
            sessions: deps.sessions,
            sync,
            cache,
            users: deps.users,
            navigator: deps.navigator,
            notifier: deps.notifier,
            state,
            is_redirecting: Mutex::new(None),
            redirect_lock: AsyncMutex::new(()),
            oauth_callback_timeout: config.oauth_callback_timeout,
            session_retry_timeout: config.session_retry_timeout,
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Read-only view of the cached profile entries.
    pub fn profile_cache(&self) -> &ProfileCache {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }

    fn set_state(&self, state: AuthState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Auth state changed");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────

    /// Initial check on startup.
    ///
    /// On the OAuth callback route the provider may still be persisting the
    /// session, so a missing session is retried for a bounded time.
    pub async fn start(&self) -> AuthState {
        let mut events = self.sessions.subscribe();

        let session = match self.sessions.load().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore session");
                None
            }
        };

        let session = match session {
            Some(session) => Some(session),
            None if self.navigator.current_route() == Route::AuthCallback => {
                self.wait_for_session(&mut events).await
            }
            None => None,
        };

        match session {
            Some(session) => self.check_session(&session).await,
            None => {
                self.set_state(AuthState::Unauthenticated);
                AuthState::Unauthenticated
            }
        }
    }

    /// Run the session check for `session` and apply the resulting redirect.
    pub async fn check_session(&self, session: &Session) -> AuthState {
        self.run_check(session, SyncOptions::default()).await
    }

    /// Same as [`check_session`](Self::check_session) but always goes to the backend.
    pub async fn revalidate(&self, session: &Session) -> AuthState {
        self.run_check(
            session,
            SyncOptions {
                force: true,
                ..SyncOptions::default()
            },
        )
        .await
    }

    /// React to one session change.
    pub async fn handle_event(&self, event: SessionEvent) -> AuthState {
        match event {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                self.check_session(&session).await
            }
            SessionEvent::SignedOut => {
                self.clear_local_state().await;
                AuthState::Unauthenticated
            }
        }
    }

    /// Follow session changes until the session store goes away.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = self.sessions.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        this.handle_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Session events dropped, rechecking current session");
                        match this.sessions.current() {
                            Some(session) => {
                                this.check_session(&session).await;
                            }
                            None => this.clear_local_state().await,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Session listener stopped");
        })
    }

    /// Finish an OAuth redirect.
    ///
    /// Exchanges `code` when present, then runs the session check for at most
    /// the callback timeout. If the check is still running after that the
    /// user is sent home and the check corrects the route when it finishes.
    pub async fn handle_oauth_callback(self: &Arc<Self>, code: Option<&str>) -> AuthState {
        let mut events = self.sessions.subscribe();

        let session = match code {
            Some(code) => match self.sessions.complete_oauth(code).await {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(error = %e, "OAuth code exchange failed");
                    self.notifier.notify(Notice::error(e.user_message()));
                    None
                }
            },
            None => match self.sessions.current() {
                Some(session) => Some(session),
                None => self.wait_for_session(&mut events).await,
            },
        };

        let Some(session) = session else {
            self.set_state(AuthState::Unauthenticated);
            self.navigate_once(Route::Home).await;
            return AuthState::Unauthenticated;
        };

        self.set_state(AuthState::Authenticating);
        let this = Arc::clone(self);
        let check = tokio::spawn(async move { this.check_session(&session).await });

        match tokio::time::timeout(self.oauth_callback_timeout, check).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Session check task failed");
                self.notifier
                    .notify(Notice::error(AppError::Internal(e.into()).user_message()));
                self.set_state(AuthState::Unauthenticated);
                self.navigate_once(Route::Home).await;
                AuthState::Unauthenticated
            }
            Err(_) => {
                tracing::info!(
                    timeout_ms = self.oauth_callback_timeout.as_millis() as u64,
                    "User sync still running, leaving callback page"
                );
                self.navigate_once(Route::Home).await;
                self.state()
            }
        }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthState> {
        match self.sessions.sign_in_with_password(email, password).await {
            Ok(session) => Ok(self.check_session(&session).await),
            Err(e) => {
                tracing::info!(error = %e, "Password sign-in failed");
                self.notifier.notify(Notice::error(e.user_message()));
                Err(e)
            }
        }
    }

    /// Register with email and password.
    ///
    /// Returns `Unauthenticated` when the provider wants the email confirmed first.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<AuthState> {
        match self.sessions.sign_up(email, password, metadata).await {
            Ok(Some(session)) => Ok(self.check_session(&session).await),
            Ok(None) => {
                self.notifier
                    .notify(Notice::info("Check your email to confirm your account."));
                Ok(AuthState::Unauthenticated)
            }
            Err(e) => {
                self.notifier.notify(Notice::error(e.user_message()));
                Err(e)
            }
        }
    }

    /// Sign out: drop every cached entry, end the session, go home.
    pub async fn sign_out(&self) -> AuthState {
        self.clear_local_state().await;
        self.sessions.sign_out().await;
        AuthState::Unauthenticated
    }

    // ─────────────────────────────────────────────────────────────────────
    // Profile writes
    // ─────────────────────────────────────────────────────────────────────

    /// Submit the profile setup form for the signed-in user.
    ///
    /// The submitted record must pass the same completeness rule the session
    /// check uses; on success the user lands on the feed.
    pub async fn submit_profile_setup(&self, form: ProfileSetupForm) -> Result<AuthState> {
        form.validate()
            .map_err(|e| AppError::BadRequest(first_validation_message(&e)))?;

        let session = self.sessions.current().ok_or(AppError::Unauthorized)?;
        let subject_id = session.subject_id.as_str();
        let ticket = self.cache.begin(subject_id);
        let patch = form.into_patch();

        if let Some(username) = &patch.username {
            if let Some(existing) = self.users.get_user_by_username(username).await? {
                if existing.id != subject_id {
                    return Err(AppError::BadRequest(
                        "That username is already taken".to_string(),
                    ));
                }
            }
        }

        let mut candidate = self
            .users
            .get_user_by_id(subject_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", subject_id)))?;
        patch.apply_to(&mut candidate);

        if !completeness::is_complete(&candidate) {
            return Err(AppError::BadRequest(format!(
                "Choose a username that does not start with \"{}\" and a display name other than \"{}\"",
                completeness::PLACEHOLDER_USERNAME_PREFIX,
                completeness::PLACEHOLDER_DISPLAY_NAME
            )));
        }

        let updated = self.users.update_user(subject_id, &patch).await?;
        let verdict = self.cache.store_user(&ticket, &updated)?;

        tracing::info!(subject_id, username = %updated.username, "Profile setup submitted");
        self.notifier.notify(Notice::success("Profile saved"));
        Ok(self.apply_verdict(&ticket, verdict).await)
    }

    /// Replace the cached record after a profile edit and re-derive the state.
    pub async fn update_cached_user(&self, user: UserRecord) -> Result<AuthState> {
        let session = self.sessions.current().ok_or(AppError::Unauthorized)?;
        let ticket = self.cache.begin(&session.subject_id);
        let verdict = self.cache.store_user(&ticket, &user)?;
        Ok(self.apply_verdict(&ticket, verdict).await)
    }

    /// Check a session that came from a wallet sign-in, linking `address`.
    pub(crate) async fn check_wallet_session(&self, session: &Session, address: &str) -> AuthState {
        let state = self
            .run_check(
                session,
                SyncOptions {
                    force: true,
                    wallet_address: Some(address.to_string()),
                },
            )
            .await;

        if state.is_authenticated() {
            let ticket = self.cache.begin(&session.subject_id);
            if let Err(e) = self.cache.store_wallet_address(&ticket, address) {
                tracing::debug!(error = %e, "Wallet address not cached");
            }
        }
        state
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    async fn run_check(&self, session: &Session, options: SyncOptions) -> AuthState {
        let ticket = self.cache.begin(&session.subject_id);
        self.set_state(AuthState::Authenticating);

        match self.sync.sync(&ticket, session, &options).await {
            Ok(outcome) => {
                if !self.cache.is_current(&ticket) {
                    tracing::debug!(subject_id = %session.subject_id, "Discarding sync for ended session");
                    return self.state();
                }
                self.apply_verdict(&ticket, outcome.verdict).await
            }
            Err(AppError::Superseded) => {
                tracing::debug!(subject_id = %session.subject_id, "Discarding superseded sync");
                self.state()
            }
            Err(e) => self.fall_back(&ticket, session, e).await,
        }
    }

    /// Decide from the cache alone after a failed sync.
    ///
    /// The session is kept so the next session event can retry.
    async fn fall_back(&self, ticket: &CacheTicket, session: &Session, error: AppError) -> AuthState {
        if !self.cache.is_current(ticket) {
            return self.state();
        }
        tracing::warn!(subject_id = %session.subject_id, error = %error, "User sync failed");
        self.notifier.notify(Notice::error(error.user_message()));

        if let Some(user) = self.cache.cached_user_for(&session.subject_id) {
            match self.cache.reconcile_flags(ticket, &user) {
                Ok(verdict) => {
                    tracing::info!(subject_id = %session.subject_id, ?verdict, "Using cached user record");
                    return self.apply_verdict(ticket, verdict).await;
                }
                Err(AppError::Superseded) => return self.state(),
                Err(e) => tracing::error!(error = %e, "Failed to rewrite cached profile flags"),
            }
        }

        self.set_state(AuthState::Unauthenticated);
        AuthState::Unauthenticated
    }

    /// Publish the state for `verdict` and redirect if the current route is wrong for it.
    async fn apply_verdict(&self, ticket: &CacheTicket, verdict: Verdict) -> AuthState {
        let state = AuthState::from(verdict);
        self.set_state(state);

        let current = self.navigator.current_route();
        let target = match verdict {
            Verdict::SetupNeeded => Some(Route::ProfileSetup),
            Verdict::Complete if matches!(current, Route::ProfileSetup | Route::AuthCallback) => {
                Some(Route::Feed)
            }
            Verdict::Complete => None,
        };

        if let Some(target) = target {
            self.redirect(target, Some(ticket)).await;
        }
        state
    }

    async fn navigate_once(&self, target: Route) -> bool {
        self.redirect(target, None).await
    }

    /// Navigate unless already there or already headed there.
    ///
    /// A redirect to a different route waits for the one in flight to settle
    /// and then re-reads the current route. With a ticket, the redirect is
    /// dropped once the ticket is stale.
    async fn redirect(&self, target: Route, ticket: Option<&CacheTicket>) -> bool {
        let stale = |ticket: Option<&CacheTicket>| ticket.is_some_and(|t| !self.cache.is_current(t));

        if stale(ticket) || self.navigator.current_route() == target {
            return false;
        }
        if self.redirect_target().as_ref() == Some(&target) {
            tracing::debug!(route = target.path(), "Redirect already in progress, skipping");
            return false;
        }

        let _serial = self.redirect_lock.lock().await;
        if stale(ticket) || self.navigator.current_route() == target {
            tracing::debug!(route = target.path(), "Redirect no longer needed");
            return false;
        }
        *self.is_redirecting.lock().unwrap_or_else(PoisonError::into_inner) = Some(target.clone());
        let _reset = RedirectGuard(&self.is_redirecting);

        tracing::info!(route = target.path(), "Redirecting");
        self.navigator.navigate(target).await;
        true
    }

    fn redirect_target(&self) -> Option<Route> {
        self.is_redirecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn clear_local_state(&self) {
        if let Err(e) = self.cache.invalidate() {
            tracing::error!(error = %e, "Failed to clear local cache on sign-out");
        }
        self.set_state(AuthState::Unauthenticated);

        // Sign-out always lands on the home page, even mid-redirect.
        if self.navigator.current_route() != Route::Home {
            self.navigator.navigate(Route::Home).await;
        }
    }

    async fn wait_for_session(
        &self,
        events: &mut broadcast::Receiver<SessionEvent>,
    ) -> Option<Session> {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::SignedIn(session))
                    | Ok(SessionEvent::TokenRefreshed(session)) => return Some(session),
                    Ok(SessionEvent::SignedOut) => return None,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(session) = self.sessions.current() {
                            return Some(session);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(self.session_retry_timeout, wait).await {
            Ok(session) => session,
            Err(_) => {
                tracing::info!("No session appeared after redirect");
                None
            }
        }
    }
}

/// First human-readable message out of a validation failure.
pub(crate) fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.keys().collect();
    fields.sort();

    fields
        .first()
        .and_then(|field| {
            let first = field_errors.get(*field)?.first()?;
            Some(match &first.message {
                Some(message) => message.to_string(),
                None => format!("Invalid {}", field),
            })
        })
        .unwrap_or_else(|| "Invalid input".to_string())
}
