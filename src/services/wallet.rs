// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wallet sign-in.
//!
//! Client side, [`WalletConnectFlow`] connects the wallet extension and either
//! links the address to the current session or trades a signed challenge for
//! a new one. Server side, [`WalletVerifier`] issues the challenges and checks
//! the signatures.
//!
//! Addresses are hex-encoded 32-byte Ed25519 public keys. A challenge nonce is
//! `base64url(address|timestamp_hex|random_hex|hmac_hex)`, so the server keeps
//! no state between the two calls apart from the set of nonces already spent.

use crate::config::Config;
use crate::db::UserDatabase;
use crate::error::{AppError, Result};
use crate::middleware::auth::create_jwt;
use crate::models::Session;
use crate::services::orchestrator::{AuthOrchestrator, AuthState, Notice};
use crate::services::user_sync::{fetch_or_create_user, SyncRequest};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// How long a challenge may be answered.
pub const CHALLENGE_VALIDITY: Duration = Duration::from_secs(5 * 60);

const PUBLIC_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;
const NONCE_RANDOM_LEN: usize = 16;

/// Text the wallet signs for `address` and `nonce`.
pub fn challenge_message(address: &str, nonce: &str) -> String {
    format!("Sign in to F3ociety\nAddress: {}\nNonce: {}", address, nonce)
}

/// Normalize a wallet address, rejecting anything that is not a 32-byte hex key.
pub fn parse_address(address: &str) -> Result<String> {
    let address = address.trim().to_lowercase();
    match hex::decode(&address) {
        Ok(bytes) if bytes.len() == PUBLIC_KEY_LEN => Ok(address),
        _ => Err(AppError::BadRequest(
            "Wallet address must be a hex-encoded 32-byte public key".to_string(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator contracts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConnection {
    /// Hex-encoded public key
    pub public_key: String,
}

/// Browser wallet extension.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn is_installed(&self) -> bool;

    async fn connect(&self) -> Result<WalletConnection>;

    /// Raw signature bytes over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletChallenge {
    pub address: String,
    pub nonce: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletVerifyRequest {
    pub address: String,
    pub nonce: String,
    /// Hex-encoded signature over the challenge message
    pub signature: String,
}

/// Backend half of wallet sign-in.
#[async_trait]
pub trait WalletAuthBackend: Send + Sync {
    async fn request_challenge(&self, address: &str) -> Result<WalletChallenge>;

    async fn verify_signature(&self, request: &WalletVerifyRequest) -> Result<Session>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WalletConnectFlow - client side
// ─────────────────────────────────────────────────────────────────────────────

pub struct WalletConnectFlow {
    wallet: Arc<dyn WalletProvider>,
    backend: Arc<dyn WalletAuthBackend>,
    orchestrator: Arc<AuthOrchestrator>,
}

impl WalletConnectFlow {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        backend: Arc<dyn WalletAuthBackend>,
        orchestrator: Arc<AuthOrchestrator>,
    ) -> Self {
        Self {
            wallet,
            backend,
            orchestrator,
        }
    }

    /// Connect the wallet and feed the result into the session check.
    ///
    /// Failures are reported to the user and leave the auth state alone; no
    /// session is persisted unless the whole exchange succeeded, including
    /// the profile sync for a freshly issued session.
    pub async fn connect(&self) -> Result<AuthState> {
        if !self.wallet.is_installed() {
            return Err(self.report(AppError::WalletUnavailable));
        }

        let address = match self.wallet.connect().await {
            Ok(connection) => parse_address(&connection.public_key),
            Err(e) => Err(e),
        }
        .map_err(|e| self.report(e))?;

        tracing::info!(address = %address, "Wallet connected");

        if let Some(session) = self.orchestrator.sessions().current() {
            tracing::debug!(subject_id = %session.subject_id, "Linking wallet to existing session");
            return Ok(self
                .orchestrator
                .check_wallet_session(&session, &address)
                .await);
        }

        let session = self.exchange(&address).await.map_err(|e| self.report(e))?;
        self.orchestrator
            .sessions()
            .adopt(session.clone())
            .await
            .map_err(|e| self.report(e))?;

        let state = self
            .orchestrator
            .check_wallet_session(&session, &address)
            .await;
        if !state.is_authenticated() {
            // The failed check already told the user why.
            tracing::warn!(subject_id = %session.subject_id, "Profile sync failed after wallet sign-in, dropping session");
            self.orchestrator.sign_out().await;
            return Err(AppError::Backend(
                "profile sync failed after wallet sign-in".to_string(),
            ));
        }
        Ok(state)
    }

    async fn exchange(&self, address: &str) -> Result<Session> {
        let challenge = self.backend.request_challenge(address).await?;
        let signature = self
            .wallet
            .sign_message(challenge.message.as_bytes())
            .await?;

        self.backend
            .verify_signature(&WalletVerifyRequest {
                address: address.to_string(),
                nonce: challenge.nonce,
                signature: hex::encode(signature),
            })
            .await
    }

    fn report(&self, error: AppError) -> AppError {
        tracing::warn!(error = %error, "Wallet sign-in failed");
        self.orchestrator.notify(Notice::error(error.user_message()));
        error
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WalletVerifier - server side
// ─────────────────────────────────────────────────────────────────────────────

/// Issues challenges and exchanges valid signatures for sessions.
pub struct WalletVerifier {
    challenge_key: Vec<u8>,
    jwt_signing_key: Vec<u8>,
    session_ttl: Duration,
    db: Arc<dyn UserDatabase>,
    rng: SystemRandom,
    /// Nonces already exchanged, with their issue time (ms), until they expire.
    spent: DashMap<String, u128>,
}

impl WalletVerifier {
    pub fn new(config: &Config, db: Arc<dyn UserDatabase>) -> Self {
        Self {
            challenge_key: config.wallet_challenge_key.clone(),
            jwt_signing_key: config.jwt_signing_key.clone(),
            session_ttl: config.session_ttl,
            db,
            rng: SystemRandom::new(),
            spent: DashMap::new(),
        }
    }

    pub fn issue_challenge(&self, address: &str) -> Result<WalletChallenge> {
        let address = parse_address(address)?;
        let nonce = self.sign_nonce(&address, now_millis()?)?;

        Ok(WalletChallenge {
            message: challenge_message(&address, &nonce),
            address,
            nonce,
        })
    }

    /// Check the signed challenge and return a session for the wallet's user.
    pub async fn verify(&self, request: &WalletVerifyRequest) -> Result<Session> {
        let address = parse_address(&request.address)?;
        let now = now_millis()?;

        let issued_at = self.verify_nonce(&request.nonce, &address, now).ok_or_else(|| {
            AppError::WalletRejected("Challenge is invalid or expired".to_string())
        })?;

        let signature = hex::decode(request.signature.trim())
            .ok()
            .filter(|s| s.len() == SIGNATURE_LEN)
            .ok_or_else(|| AppError::WalletRejected("Malformed signature".to_string()))?;

        let public_key = hex::decode(&address)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Address decode failed: {}", e)))?;
        let message = challenge_message(&address, &request.nonce);

        UnparsedPublicKey::new(&ED25519, &public_key)
            .verify(message.as_bytes(), &signature)
            .map_err(|_| {
                tracing::warn!(address = %address, "Wallet signature verification failed");
                AppError::WalletRejected("Signature verification failed".to_string())
            })?;

        self.spend_nonce(&request.nonce, issued_at, now)?;

        let subject_id = match self.db.get_user_by_wallet(&address).await? {
            Some(user) => user.id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        // Make sure the record exists and carries the wallet before the
        // client's own sync runs.
        let user = fetch_or_create_user(
            self.db.as_ref(),
            &SyncRequest {
                user_id: subject_id.clone(),
                force_sync: false,
                metadata: serde_json::Value::Null,
                wallet_address: Some(address.clone()),
            },
        )
        .await?;

        let (access_token, expires_at) = create_jwt(
            &user.id,
            Some(&address),
            &self.jwt_signing_key,
            self.session_ttl,
        )?;

        tracing::info!(subject_id = %user.id, address = %address, "Wallet sign-in verified");

        Ok(Session {
            subject_id: user.id,
            access_token,
            refresh_token: None,
            expires_at: Some(expires_at),
            user_metadata: serde_json::json!({ "wallet_address": address }),
        })
    }

    fn sign_nonce(&self, address: &str, timestamp_ms: u128) -> Result<String> {
        let mut random = [0u8; NONCE_RANDOM_LEN];
        self.rng
            .fill(&mut random)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;

        // "address|timestamp_hex|random_hex"
        let payload = format!("{}|{:x}|{}", address, timestamp_ms, hex::encode(random));

        let mut mac = HmacSha256::new_from_slice(&self.challenge_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
    }

    /// Issue time of `nonce` if it is authentic, unexpired and bound to `address`.
    fn verify_nonce(&self, nonce: &str, address: &str, now_ms: u128) -> Option<u128> {
        let bytes = URL_SAFE_NO_PAD.decode(nonce).ok()?;
        let decoded = String::from_utf8(bytes).ok()?;

        // Format is "address|timestamp_hex|random_hex|signature_hex"
        let (payload, signature_hex) = decoded.rsplit_once('|')?;
        let parts: Vec<&str> = payload.split('|').collect();
        if parts.len() != 3 {
            return None;
        }

        let mut mac = HmacSha256::new_from_slice(&self.challenge_key).ok()?;
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if !bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes())) {
            tracing::error!("Wallet challenge signature mismatch! Potential tampering.");
            return None;
        }

        if parts[0] != address {
            tracing::warn!(address, "Wallet challenge was issued for another address");
            return None;
        }

        let issued_at = u128::from_str_radix(parts[1], 16).ok()?;
        if now_ms.saturating_sub(issued_at) > CHALLENGE_VALIDITY.as_millis() || issued_at > now_ms {
            return None;
        }
        Some(issued_at)
    }

    fn spend_nonce(&self, nonce: &str, issued_at: u128, now_ms: u128) -> Result<()> {
        let validity = CHALLENGE_VALIDITY.as_millis();
        self.spent
            .retain(|_, issued| now_ms.saturating_sub(*issued) <= validity);

        if self.spent.insert(nonce.to_string(), issued_at).is_some() {
            return Err(AppError::WalletRejected(
                "Challenge has already been used".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletAuthBackend for WalletVerifier {
    async fn request_challenge(&self, address: &str) -> Result<WalletChallenge> {
        self.issue_challenge(address)
    }

    async fn verify_signature(&self, request: &WalletVerifyRequest) -> Result<Session> {
        self.verify(request).await
    }
}

fn now_millis() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis())
}
