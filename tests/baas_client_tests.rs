// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Backend client tests against a live functions server.
//!
//! The functions router runs on a local port next to a minimal stand-in for
//! the provider's token endpoint, so requests go over real HTTP.

use axum::{
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use f3ociety::config::{ClientConfig, Config};
use f3ociety::db::{MemoryDb, UserDatabase};
use f3ociety::error::AppError;
use f3ociety::middleware::auth::create_jwt;
use f3ociety::services::baas::pkce_challenge;
use f3ociety::services::cache::keys;
use f3ociety::services::user_sync::SyncRequest;
use f3ociety::services::wallet::WalletVerifyRequest;
use f3ociety::services::{
    AuthOrchestrator, AuthProvider, AuthState, BaasClient, LocalCache, MemoryCache,
    OrchestratorDeps, Route, SessionStore, SyncBackend, WalletAuthBackend,
};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{create_test_app, session, RecordingNavigator, RecordingNotifier};

const SUBJECT: &str = "ada-subject-1";

#[derive(Deserialize)]
struct Grant {
    grant_type: String,
}

/// Provider token endpoint accepting one account, one OAuth code and one refresh token.
async fn token_endpoint(Query(grant): Query<Grant>, Json(body): Json<Value>) -> Response {
    let accepted = match grant.grant_type.as_str() {
        "password" => body["email"] == "ada@example.com" && body["password"] == "hunter2",
        "pkce" => body["auth_code"] == "good-code" && body["code_verifier"].is_string(),
        "refresh_token" => body["refresh_token"] == "refresh-1",
        _ => false,
    };
    if !accepted {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        )
            .into_response();
    }

    let (access_token, _) = create_jwt(
        SUBJECT,
        None,
        &Config::test_default().jwt_signing_key,
        Duration::from_secs(3600),
    )
    .unwrap();

    Json(json!({
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "user": { "id": SUBJECT, "user_metadata": { "full_name": "Ada Lovelace" } }
    }))
    .into_response()
}

fn provider_routes() -> Router {
    Router::new()
        .route("/auth/v1/token", post(token_endpoint))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
}

/// Serve the functions router on a random local port.
async fn spawn_backend() -> (String, Arc<MemoryDb>) {
    let (router, _, db) = create_test_app();
    let app = router.merge(provider_routes());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), db)
}

fn client_for(url: &str) -> (BaasClient, Arc<MemoryCache>) {
    let config = ClientConfig {
        backend_url: url.to_string(),
        ..ClientConfig::test_default()
    };
    let cache = Arc::new(MemoryCache::new());
    (BaasClient::new(&config, cache.clone()), cache)
}

// ─── Auth ────────────────────────────────────────────────────

#[tokio::test]
async fn test_password_sign_in_persists_session() {
    let (url, _) = spawn_backend().await;
    let (client, cache) = client_for(&url);

    let signed_in = client
        .sign_in_with_password("ada@example.com", "hunter2")
        .await
        .unwrap();

    assert_eq!(signed_in.subject_id, SUBJECT);
    assert_eq!(signed_in.user_metadata["full_name"], "Ada Lovelace");
    assert!(signed_in.expires_at.is_some());
    assert!(cache.get(keys::SESSION).is_some());

    let restored = client.get_session().await.unwrap();
    assert_eq!(restored, Some(signed_in));
}

#[tokio::test]
async fn test_bad_password_is_auth_rejection() {
    let (url, _) = spawn_backend().await;
    let (client, cache) = client_for(&url);

    let result = client.sign_in_with_password("ada@example.com", "wrong").await;

    match result {
        Err(AppError::AuthRejected(detail)) => assert_eq!(detail, "Invalid login credentials"),
        other => panic!("expected AuthRejected, got {:?}", other),
    }
    assert!(cache.get(keys::SESSION).is_none());
}

#[tokio::test]
async fn test_oauth_pkce_flow() {
    let (url, _) = spawn_backend().await;
    let (client, cache) = client_for(&url);

    let authorize = client
        .authorize_url("google", "http://localhost:5173/auth/callback")
        .await
        .unwrap();
    let verifier = cache.get(keys::OAUTH_CODE_VERIFIER).unwrap();
    assert!(authorize.contains(&format!("code_challenge={}", pkce_challenge(&verifier))));
    assert!(authorize.contains("redirect_to=http%3A%2F%2Flocalhost%3A5173%2Fauth%2Fcallback"));

    let exchanged = client.exchange_code("good-code").await.unwrap();

    assert_eq!(exchanged.subject_id, SUBJECT);
    assert!(cache.get(keys::OAUTH_CODE_VERIFIER).is_none());
}

#[tokio::test]
async fn test_code_exchange_without_verifier_rejected() {
    let (url, _) = spawn_backend().await;
    let (client, _) = client_for(&url);

    let result = client.exchange_code("good-code").await;
    assert!(matches!(result, Err(AppError::AuthRejected(_))));
}

#[tokio::test]
async fn test_expiring_session_is_refreshed() {
    let (url, _) = spawn_backend().await;
    let (client, _) = client_for(&url);
    let stale = f3ociety::models::Session {
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Some(chrono::Utc::now().timestamp() + 10),
        ..session(SUBJECT)
    };
    client.persist_session(&stale).await.unwrap();

    let refreshed = client.get_session().await.unwrap().unwrap();

    assert_eq!(refreshed.subject_id, SUBJECT);
    assert_ne!(refreshed.access_token, stale.access_token);
}

#[tokio::test]
async fn test_expired_session_without_refresh_token_dropped() {
    let (url, _) = spawn_backend().await;
    let (client, cache) = client_for(&url);
    let expired = f3ociety::models::Session {
        expires_at: Some(chrono::Utc::now().timestamp() - 10),
        ..session(SUBJECT)
    };
    client.persist_session(&expired).await.unwrap();

    assert_eq!(client.get_session().await.unwrap(), None);
    assert!(cache.get(keys::SESSION).is_none());
}

#[tokio::test]
async fn test_sign_out_clears_stored_session() {
    let (url, _) = spawn_backend().await;
    let (client, cache) = client_for(&url);
    let signed_in = client
        .sign_in_with_password("ada@example.com", "hunter2")
        .await
        .unwrap();

    client.sign_out(&signed_in).await.unwrap();

    assert!(cache.get(keys::SESSION).is_none());
}

// ─── Functions ───────────────────────────────────────────────

#[tokio::test]
async fn test_sync_user_over_http() {
    let (url, db) = spawn_backend().await;
    let (client, _) = client_for(&url);
    let signed_in = client
        .sign_in_with_password("ada@example.com", "hunter2")
        .await
        .unwrap();

    let response = client
        .sync_user(
            &signed_in.access_token,
            &SyncRequest {
                user_id: SUBJECT.to_string(),
                force_sync: true,
                metadata: signed_in.user_metadata.clone(),
                wallet_address: None,
            },
        )
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.needs_profile_setup);
    let user = response.user.unwrap();
    assert_eq!(user.display_name, "Ada Lovelace");
    assert_eq!(user.username, "user_ada-subj");
    assert_eq!(db.user_count().await, 1);
}

#[tokio::test]
async fn test_sync_user_with_bad_token() {
    let (url, db) = spawn_backend().await;
    let (client, _) = client_for(&url);

    let result = client
        .sync_user(
            "forged",
            &SyncRequest {
                user_id: SUBJECT.to_string(),
                force_sync: false,
                metadata: Value::Null,
                wallet_address: None,
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::InvalidToken)));
    assert_eq!(db.user_count().await, 0);
}

#[tokio::test]
async fn test_wallet_exchange_over_http() {
    let (url, db) = spawn_backend().await;
    let (client, _) = client_for(&url);
    let key = Ed25519KeyPair::from_seed_unchecked(&[5u8; 32]).unwrap();
    let address = hex::encode(key.public_key().as_ref());

    let challenge = client.request_challenge(&address).await.unwrap();
    let signed = client
        .verify_signature(&WalletVerifyRequest {
            address: address.clone(),
            nonce: challenge.nonce.clone(),
            signature: hex::encode(key.sign(challenge.message.as_bytes()).as_ref()),
        })
        .await
        .unwrap();

    let stored = db.get_user_by_wallet(&address).await.unwrap().unwrap();
    assert_eq!(stored.id, signed.subject_id);

    let result = client
        .verify_signature(&WalletVerifyRequest {
            address: address.clone(),
            nonce: challenge.nonce,
            signature: "00".repeat(64),
        })
        .await;
    assert!(matches!(result, Err(AppError::WalletRejected(_))));
}

#[tokio::test]
async fn test_wallet_challenge_bad_address() {
    let (url, _) = spawn_backend().await;
    let (client, _) = client_for(&url);

    let result = client.request_challenge("zz").await;
    assert!(matches!(result, Err(AppError::WalletRejected(_))));
}

#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    // Bind and drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (client, _) = client_for(&format!("http://{}", addr));

    let result = client.sign_in_with_password("ada@example.com", "hunter2").await;

    let err = result.unwrap_err();
    assert!(err.is_transient(), "{:?}", err);
}

// ─── Whole client ────────────────────────────────────────────

#[tokio::test]
async fn test_orchestrator_over_http() {
    let (url, db) = spawn_backend().await;
    let (client, cache) = client_for(&url);
    let client = Arc::new(client);
    let navigator = Arc::new(RecordingNavigator::new(Route::Home));

    let orchestrator = AuthOrchestrator::new(
        OrchestratorDeps {
            sessions: Arc::new(SessionStore::new(client.clone())),
            sync_backend: client.clone(),
            users: client.clone(),
            cache: cache.clone(),
            navigator: navigator.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
        },
        &ClientConfig::test_default(),
    );

    let state = orchestrator
        .sign_in_with_password("ada@example.com", "hunter2")
        .await
        .unwrap();

    assert_eq!(state, AuthState::AuthenticatedSetupNeeded);
    assert_eq!(navigator.navigations(), vec![Route::ProfileSetup]);
    assert_eq!(
        orchestrator.profile_cache().cached_user().unwrap().id,
        SUBJECT
    );
    assert_eq!(db.user_count().await, 1);
}
