// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Configuration loaded from environment variables.
//!
//! `Config` drives the backend functions server. `ClientConfig` drives the
//! client core: backend location, public API key and the bounded waits used
//! by the auth orchestrator.

use std::env;
use std::time::Duration;

/// Functions server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Lifetime of wallet-issued sessions
    pub session_ttl: Duration,

    // --- Secrets ---
    /// JWT signing key shared with the auth provider (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for wallet sign-in challenges
    pub wallet_challenge_key: Vec<u8>,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            session_ttl: Duration::from_secs(60 * 60),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            wallet_challenge_key: b"test_wallet_challenge_key_32b!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development a `.env` file is honored. In production the
    /// secrets are injected as environment variables by the platform.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            session_ttl: Duration::from_secs(parse_or("SESSION_TTL_SECS", 7 * 24 * 60 * 60)),

            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            wallet_challenge_key: env::var("WALLET_CHALLENGE_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WALLET_CHALLENGE_KEY"))?
                .into_bytes(),
        })
    }
}

/// Client core configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend project URL (auth, rest and functions live under it)
    pub backend_url: String,
    /// Public API key, embedded at build time and not secret
    pub api_key: String,
    /// Longest time the OAuth callback screen waits for the user sync
    pub oauth_callback_timeout: Duration,
    /// Longest time to wait for a session to appear after a redirect
    pub session_retry_timeout: Duration,
    /// How long a cached "setup complete" verdict is trusted without a fetch
    pub profile_revalidate_after: Duration,
    /// Where the durable local cache lives
    pub cache_path: String,
}

impl ClientConfig {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            api_key: "test_anon_key".to_string(),
            oauth_callback_timeout: Duration::from_millis(1500),
            session_retry_timeout: Duration::from_millis(1000),
            profile_revalidate_after: Duration::from_secs(300),
            cache_path: ".f3ociety/cache.json".to_string(),
        }
    }

    /// Load the client configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            backend_url: env::var("BACKEND_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("BACKEND_URL"))?,
            api_key: env::var("BACKEND_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("BACKEND_API_KEY"))?,
            oauth_callback_timeout: Duration::from_millis(parse_or(
                "OAUTH_CALLBACK_TIMEOUT_MS",
                1500,
            )),
            session_retry_timeout: Duration::from_millis(parse_or(
                "SESSION_RETRY_TIMEOUT_MS",
                1000,
            )),
            profile_revalidate_after: Duration::from_secs(parse_or(
                "PROFILE_REVALIDATE_SECS",
                300,
            )),
            cache_path: env::var("LOCAL_CACHE_PATH")
                .unwrap_or_else(|_| ".f3ociety/cache.json".to_string()),
        })
    }
}

/// Read a numeric variable, falling back to `default` when unset or invalid.
fn parse_or(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, default, "Invalid numeric value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("WALLET_CHALLENGE_KEY", " challenge_key ");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.jwt_signing_key, b"test_jwt_key_32_bytes_minimum!!");
        assert_eq!(config.wallet_challenge_key, b"challenge_key");
    }

    #[test]
    fn test_client_config_from_env() {
        env::set_var("BACKEND_URL", "https://project.example.co/");
        env::set_var("BACKEND_API_KEY", "anon");
        env::set_var("OAUTH_CALLBACK_TIMEOUT_MS", "800");

        let config = ClientConfig::from_env().expect("Client config should load");

        assert_eq!(config.backend_url, "https://project.example.co");
        assert_eq!(config.api_key, "anon");
        assert_eq!(config.oauth_callback_timeout, Duration::from_millis(800));
        assert_eq!(config.profile_revalidate_after, Duration::from_secs(300));
    }
}
