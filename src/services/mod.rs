// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod baas;
pub mod cache;
pub mod completeness;
pub mod orchestrator;
pub mod session;
pub mod social;
pub mod user_sync;
pub mod wallet;

pub use baas::BaasClient;
pub use cache::{FileCache, LocalCache, MemoryCache, ProfileCache};
pub use completeness::{is_complete, Verdict};
pub use orchestrator::{
    AuthOrchestrator, AuthState, LogNotifier, Navigator, Notice, NoticeLevel, Notifier,
    OrchestratorDeps, Route,
};
pub use session::{AuthProvider, SessionEvent, SessionStore};
pub use social::SocialService;
pub use user_sync::{DatabaseSync, SyncBackend, SyncOutcome, UserSyncService};
pub use wallet::{WalletAuthBackend, WalletConnectFlow, WalletProvider, WalletVerifier};
