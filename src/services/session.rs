// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session store wrapping the external auth provider.
//!
//! The provider is plain request/response. `SessionStore` remembers the
//! current session and broadcasts a [`SessionEvent`] whenever it changes, which
//! is what the auth orchestrator listens to.

use crate::error::Result;
use crate::models::Session;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Auth provider capabilities consumed by the client.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Restore the persisted session, refreshing it if it is about to expire.
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Persist a session obtained outside the provider (wallet sign-in).
    async fn persist_session(&self, session: &Session) -> Result<()>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Register a new account. `None` when the provider requires email confirmation first.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<Session>>;

    /// URL to send the browser to for an OAuth sign-in.
    async fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String>;

    /// Exchange the code from an OAuth callback for a session.
    async fn exchange_code(&self, code: &str) -> Result<Session>;

    async fn sign_out(&self, session: &Session) -> Result<()>;
}

/// Session change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Current session plus change notifications.
pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            current: RwLock::new(None),
            events,
        }
    }

    /// Subscribe to session changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().ok().and_then(|s| s.clone())
    }

    pub fn subject_id(&self) -> Option<String> {
        self.current().map(|s| s.subject_id)
    }

    /// Ask the provider for the persisted session and make it current.
    ///
    /// Emits `TokenRefreshed` if the provider handed back a different token for
    /// the same subject.
    pub async fn load(&self) -> Result<Option<Session>> {
        let session = self.provider.get_session().await?;
        let previous = self.replace(session.clone());

        if let (Some(prev), Some(next)) = (&previous, &session) {
            if prev.subject_id == next.subject_id && prev.access_token != next.access_token {
                self.emit(SessionEvent::TokenRefreshed(next.clone()));
            }
        }
        Ok(session)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        self.set_signed_in(session.clone());
        Ok(session)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<Session>> {
        let session = self.provider.sign_up(email, password, metadata).await?;
        if let Some(session) = &session {
            self.set_signed_in(session.clone());
        }
        Ok(session)
    }

    pub async fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String> {
        self.provider.authorize_url(provider, redirect_to).await
    }

    pub async fn complete_oauth(&self, code: &str) -> Result<Session> {
        let session = self.provider.exchange_code(code).await?;
        self.set_signed_in(session.clone());
        Ok(session)
    }

    /// Make a session obtained elsewhere (wallet exchange) current.
    ///
    /// Nothing is stored if the provider cannot persist it.
    pub async fn adopt(&self, session: Session) -> Result<()> {
        self.provider.persist_session(&session).await?;
        self.set_signed_in(session);
        Ok(())
    }

    /// Sign out. The local session is dropped even if the provider call fails.
    pub async fn sign_out(&self) {
        if let Some(session) = self.replace(None) {
            if let Err(e) = self.provider.sign_out(&session).await {
                tracing::warn!(error = %e, "Provider sign-out failed, local session dropped anyway");
            }
            self.emit(SessionEvent::SignedOut);
        }
    }

    fn set_signed_in(&self, session: Session) {
        self.replace(Some(session.clone()));
        self.emit(SessionEvent::SignedIn(session));
    }

    fn replace(&self, session: Option<Session>) -> Option<Session> {
        match self.current.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, session),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), session),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine: the orchestrator may not be listening yet.
        let _ = self.events.send(event);
    }
}
