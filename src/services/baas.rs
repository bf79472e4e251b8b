// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP client for the managed backend.
//!
//! Handles:
//! - Auth (password, sign-up, OAuth with PKCE, refresh, logout)
//! - Table reads and writes through the REST endpoint
//! - Serverless functions (`sync-auth-user`, wallet challenge and verify)
//!
//! Every request carries the public API key. Data requests are authorized
//! with the persisted session's access token when there is one.

use crate::config::ClientConfig;
use crate::db::{FeedDatabase, UserDatabase};
use crate::error::{AppError, Result};
use crate::models::{Notification, Session, Tweet, UserPatch, UserRecord};
use crate::services::cache::{keys, LocalCache};
use crate::services::session::AuthProvider;
use crate::services::user_sync::{SyncBackend, SyncRequest, SyncResponse};
use crate::services::wallet::{
    ChallengeRequest, WalletAuthBackend, WalletChallenge, WalletVerifyRequest,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Refresh tokens that expire within this margin.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

const PKCE_VERIFIER_LEN: usize = 32;

/// What a failed request was trying to do; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Auth,
    Data,
    Function,
    Wallet,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: ProviderUser,
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

/// Sign-up returns a session, or only the user when email confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    Pending(ProviderUser),
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs));
        Session {
            subject_id: self.user.id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user_metadata: self.user.user_metadata,
        }
    }
}

/// Backend client.
#[derive(Clone)]
pub struct BaasClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Arc<dyn LocalCache>,
    rng: SystemRandom,
}

impl BaasClient {
    pub fn new(config: &ClientConfig, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            cache,
            rng: SystemRandom::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn stored_session(&self) -> Option<Session> {
        let raw = self.cache.get(keys::SESSION)?;
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!(error = %e, "Ignoring unreadable stored session"))
            .ok()
    }

    fn store_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)
            .map_err(|e| AppError::Cache(format!("Failed to serialize session: {}", e)))?;
        self.cache.set(keys::SESSION, &json)
    }

    /// Token for data requests: the session's, else the API key.
    fn bearer(&self) -> String {
        self.stored_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.api_key.clone())
    }

    fn request(&self, method: reqwest::Method, path: &str, bearer: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    fn rest(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", table), &self.bearer())
    }

    /// Send and parse a JSON response.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        surface: Surface,
    ) -> Result<T> {
        let response = self.send(request, surface).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::Backend(format!("JSON parse error: {}", e)))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        surface: Surface,
    ) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Backend(format!("Request failed: {}", e)))?;
        self.check_response(response, surface).await
    }

    /// Map a non-success status to an error.
    async fn check_response(
        &self,
        response: reqwest::Response,
        surface: Surface,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status));

        if status.as_u16() == 429 || status.is_server_error() {
            tracing::warn!(status = %status, "Backend unavailable");
            return Err(AppError::Backend(format!("HTTP {}: {}", status, detail)));
        }

        Err(match (surface, status.as_u16()) {
            (Surface::Auth, 400 | 401 | 403 | 422) => AppError::AuthRejected(detail),
            (Surface::Wallet, 400 | 401 | 403) => AppError::WalletRejected(detail),
            (_, 401 | 403) => AppError::InvalidToken,
            (_, 404) => AppError::NotFound(detail),
            (_, 409) => AppError::Conflict(detail),
            _ => AppError::BadRequest(detail),
        })
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("/auth/v1/token?grant_type={}", grant_type),
                &self.api_key,
            )
            .json(&body);
        let tokens: TokenResponse = self.send_json(request, Surface::Auth).await?;

        let session = tokens.into_session(Utc::now().timestamp());
        self.store_session(&session)?;
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    /// Users with `field` matching a PostgREST filter expression.
    async fn select_users(&self, filters: &[(&str, String)]) -> Result<Vec<UserRecord>> {
        let request = self
            .rest(reqwest::Method::GET, "users")
            .query(&[("select", "*")])
            .query(filters);
        self.send_json(request, Surface::Data).await
    }

    async fn first_user(&self, field: &str, value: &str) -> Result<Option<UserRecord>> {
        let users = self
            .select_users(&[(field, format!("eq.{}", value)), ("limit", "1".to_string())])
            .await?;
        Ok(users.into_iter().next())
    }

    async fn call_rpc(&self, function: &str, body: serde_json::Value) -> Result<()> {
        let request = self
            .rest(reqwest::Method::POST, &format!("rpc/{}", function))
            .json(&body);
        self.send(request, Surface::Data).await?;
        Ok(())
    }
}

/// `message`, `msg`, `error_description` or `error` from an error body.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "details", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// PostgREST `in.(...)` list. Values are quoted so commas cannot split them.
fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Total row count from a PostgREST `Content-Range` header.
fn parse_content_range_total(range: &str) -> Option<usize> {
    range.rsplit_once('/')?.1.parse().ok()
}

/// PKCE S256 challenge for `verifier`.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[async_trait]
impl AuthProvider for BaasClient {
    async fn get_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.stored_session() else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        if !session.expires_within(now, TOKEN_REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            tracing::info!(subject_id = %session.subject_id, "Session expired without refresh token");
            self.cache.remove(keys::SESSION)?;
            return Ok(None);
        };

        match self.refresh(refresh_token).await {
            Ok(refreshed) => {
                tracing::debug!(subject_id = %refreshed.subject_id, "Session refreshed");
                Ok(Some(refreshed))
            }
            Err(e) if e.is_auth_rejection() => {
                tracing::info!(error = %e, "Refresh token rejected, dropping session");
                self.cache.remove(keys::SESSION)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist_session(&self, session: &Session) -> Result<()> {
        self.store_session(session)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<Session>> {
        let request = self
            .request(reqwest::Method::POST, "/auth/v1/signup", &self.api_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": metadata,
            }));

        match self.send_json::<SignUpResponse>(request, Surface::Auth).await? {
            SignUpResponse::Session(tokens) => {
                let session = tokens.into_session(Utc::now().timestamp());
                self.store_session(&session)?;
                Ok(Some(session))
            }
            SignUpResponse::Pending(user) => {
                tracing::info!(subject_id = %user.id, "Sign-up pending email confirmation");
                Ok(None)
            }
        }
    }

    async fn authorize_url(&self, provider: &str, redirect_to: &str) -> Result<String> {
        let mut random = [0u8; PKCE_VERIFIER_LEN];
        self.rng
            .fill(&mut random)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
        let verifier = URL_SAFE_NO_PAD.encode(random);
        self.cache.set(keys::OAUTH_CODE_VERIFIER, &verifier)?;

        Ok(format!(
            "{}/auth/v1/authorize?provider={}&redirect_to={}&code_challenge={}&code_challenge_method=s256",
            self.base_url,
            urlencoding::encode(provider),
            urlencoding::encode(redirect_to),
            pkce_challenge(&verifier)
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<Session> {
        let verifier = self.cache.get(keys::OAUTH_CODE_VERIFIER).ok_or_else(|| {
            AppError::AuthRejected("No OAuth sign-in in progress".to_string())
        })?;

        let session = self
            .token_grant(
                "pkce",
                serde_json::json!({ "auth_code": code, "code_verifier": verifier }),
            )
            .await?;

        self.cache.remove(keys::OAUTH_CODE_VERIFIER)?;
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        self.cache.remove(keys::SESSION)?;
        let request = self.request(
            reqwest::Method::POST,
            "/auth/v1/logout",
            &session.access_token,
        );
        self.send(request, Surface::Auth).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for BaasClient {
    async fn sync_user(&self, access_token: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let request = self
            .request(
                reqwest::Method::POST,
                "/functions/v1/sync-auth-user",
                access_token,
            )
            .json(request);
        self.send_json(request, Surface::Function).await
    }
}

#[async_trait]
impl WalletAuthBackend for BaasClient {
    async fn request_challenge(&self, address: &str) -> Result<WalletChallenge> {
        let request = self
            .request(
                reqwest::Method::POST,
                "/functions/v1/wallet-challenge",
                &self.api_key,
            )
            .json(&ChallengeRequest {
                address: address.to_string(),
            });
        self.send_json(request, Surface::Wallet).await
    }

    async fn verify_signature(&self, request: &WalletVerifyRequest) -> Result<Session> {
        let request = self
            .request(
                reqwest::Method::POST,
                "/functions/v1/wallet-verify",
                &self.api_key,
            )
            .json(request);
        self.send_json(request, Surface::Wallet).await
    }
}

#[async_trait]
impl UserDatabase for BaasClient {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        self.first_user("id", id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.first_user("username", username).await
    }

    async fn get_user_by_wallet(&self, address: &str) -> Result<Option<UserRecord>> {
        self.first_user("wallet_address", address).await
    }

    async fn create_user(&self, user: &UserRecord) -> Result<UserRecord> {
        let request = self
            .rest(reqwest::Method::POST, "users")
            .header("Prefer", "return=representation")
            .json(user);
        let created: Vec<UserRecord> = self.send_json(request, Surface::Data).await?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Backend("Insert returned no row".to_string()))
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<UserRecord> {
        let request = self
            .rest(reqwest::Method::PATCH, "users")
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);
        let updated: Vec<UserRecord> = self.send_json(request, Surface::Data).await?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("User {}", id)))
    }

    async fn list_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.select_users(&[("id", in_list(ids))]).await?;

        // Keep the caller's order.
        Ok(ids
            .iter()
            .filter_map(|id| users.iter().find(|u| &u.id == id).cloned())
            .collect())
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<UserRecord>> {
        // Characters that are syntax inside a PostgREST `or` filter.
        let term: String = query
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"' | '.'))
            .collect();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        self.select_users(&[
            (
                "or",
                format!("(username.ilike.*{0}*,display_name.ilike.*{0}*)", term),
            ),
            ("order", "username.asc".to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn follow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        self.call_rpc(
            "follow_user",
            serde_json::json!({ "follower_id": follower_id, "followed_id": followed_id }),
        )
        .await
    }

    async fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        self.call_rpc(
            "unfollow_user",
            serde_json::json!({ "follower_id": follower_id, "followed_id": followed_id }),
        )
        .await
    }
}

#[async_trait]
impl FeedDatabase for BaasClient {
    async fn create_tweet(&self, tweet: &Tweet) -> Result<Tweet> {
        let request = self
            .rest(reqwest::Method::POST, "tweets")
            .header("Prefer", "return=representation")
            .json(tweet);
        let created: Vec<Tweet> = self.send_json(request, Surface::Data).await?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Backend("Insert returned no row".to_string()))
    }

    async fn list_tweets_by_authors(
        &self,
        author_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Tweet>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.rest(reqwest::Method::GET, "tweets").query(&[
            ("select", "*".to_string()),
            ("author_id", in_list(author_ids)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send_json(request, Surface::Data).await
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        let request = self
            .rest(reqwest::Method::POST, "notifications")
            .header("Prefer", "return=minimal")
            .json(notification);
        self.send(request, Surface::Data).await?;
        Ok(())
    }

    async fn list_notifications(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let request = self.rest(reqwest::Method::GET, "notifications").query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send_json(request, Surface::Data).await
    }

    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize> {
        let request = self
            .rest(reqwest::Method::HEAD, "notifications")
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("read", "eq.false".to_string()),
            ])
            .header("Prefer", "count=exact");
        let response = self.send(request, Surface::Data).await?;

        // `Content-Range: 0-24/57` or `*/0`; the total follows the slash.
        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| AppError::Backend("Missing row count in response".to_string()))
    }

    async fn mark_notifications_read(&self, user_id: &str) -> Result<()> {
        let request = self
            .rest(reqwest::Method::PATCH, "notifications")
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("read", "eq.false".to_string()),
            ])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "read": true }));
        self.send(request, Surface::Data).await?;
        Ok(())
    }
}
