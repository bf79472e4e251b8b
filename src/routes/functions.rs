// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Serverless functions called by the client core.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Session;
use crate::services::user_sync::{fetch_or_create_user, SyncRequest, SyncResponse};
use crate::services::wallet::{ChallengeRequest, WalletChallenge, WalletVerifyRequest};
use crate::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use std::sync::Arc;

/// Functions that need a bearer token.
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/functions/v1/sync-auth-user", post(sync_auth_user))
}

/// Wallet sign-in functions (the caller has no session yet).
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/functions/v1/wallet-challenge", post(wallet_challenge))
        .route("/functions/v1/wallet-verify", post(wallet_verify))
}

/// Fetch or create the caller's user record and report its completeness.
///
/// Failures still answer with a `SyncResponse` body so the client always sees
/// `{ success, error }`.
async fn sync_auth_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SyncRequest>,
) -> Response {
    if request.user_id != user.subject_id {
        tracing::warn!(
            subject_id = %user.subject_id,
            requested = %request.user_id,
            "Sync requested for another user"
        );
        return sync_failure(AppError::Unauthorized);
    }

    match fetch_or_create_user(state.db.as_ref(), &request).await {
        Ok(record) => {
            let response = SyncResponse::for_user(record);
            tracing::info!(
                subject_id = %user.subject_id,
                force = request.force_sync,
                needs_profile_setup = response.needs_profile_setup,
                "User synced"
            );
            Json(response).into_response()
        }
        Err(e) => {
            tracing::error!(subject_id = %user.subject_id, error = %e, "User sync failed");
            sync_failure(e)
        }
    }
}

fn sync_failure(error: AppError) -> Response {
    let (status, _) = error.status_and_code();
    let body = SyncResponse {
        success: false,
        user: None,
        needs_profile_setup: false,
        error: Some(error.user_message()),
    };
    (status, Json(body)).into_response()
}

async fn wallet_challenge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChallengeRequest>,
) -> Result<Json<WalletChallenge>> {
    let challenge = state.wallet.issue_challenge(&request.address)?;
    tracing::debug!(address = %challenge.address, "Wallet challenge issued");
    Ok(Json(challenge))
}

async fn wallet_verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WalletVerifyRequest>,
) -> Result<Json<Session>> {
    let session = state.wallet.verify(&request).await?;
    Ok(Json(session))
}
