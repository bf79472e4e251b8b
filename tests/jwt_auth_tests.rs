// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JWT authentication tests.
//!
//! These tests verify that tokens minted for wallet sign-in can be decoded
//! by the auth middleware, catching compatibility issues early.

use f3ociety::middleware::auth::{bearer_token, create_jwt, verify_jwt};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SIGNING_KEY: &[u8] = b"test_signing_key_32_bytes_long!!";

/// Claims structure other services decode. If `create_jwt` or the
/// middleware changes shape, this test should catch the incompatibility.
#[derive(Debug, Serialize, Deserialize)]
struct ExternalClaims {
    sub: String,
    exp: usize,
    iat: usize,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[test]
fn test_jwt_roundtrip() {
    let (token, expires_at) = create_jwt("abc", None, SIGNING_KEY, Duration::from_secs(3600))
        .expect("Failed to create JWT");

    let claims = verify_jwt(&token, SIGNING_KEY).expect("Failed to decode JWT");

    assert_eq!(claims.sub, "abc");
    assert_eq!(claims.exp as i64, expires_at);
    assert!(claims.exp > claims.iat);
    assert_eq!(claims.wallet_address, None);
}

#[test]
fn test_jwt_carries_wallet_address() {
    let address = "ab".repeat(32);
    let (token, _) = create_jwt(
        "wallet-user",
        Some(&address),
        SIGNING_KEY,
        Duration::from_secs(3600),
    )
    .unwrap();

    let claims = verify_jwt(&token, SIGNING_KEY).unwrap();
    assert_eq!(claims.wallet_address.as_deref(), Some(address.as_str()));
}

#[test]
fn test_jwt_decodes_with_minimal_claims() {
    let (token, _) = create_jwt(
        "abc",
        Some(&"cd".repeat(32)),
        SIGNING_KEY,
        Duration::from_secs(3600),
    )
    .unwrap();

    let key = DecodingKey::from_secret(SIGNING_KEY);
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<ExternalClaims>(&token, &key, &validation)
        .expect("Failed to decode JWT - check Claims struct compatibility");

    assert_eq!(token_data.claims.sub, "abc");
}

#[test]
fn test_jwt_expiration_matches_ttl() {
    let ttl = Duration::from_secs(7 * 24 * 60 * 60);
    let (_, expires_at) = create_jwt("abc", None, SIGNING_KEY, ttl).unwrap();

    let expected = now() + ttl.as_secs() as i64;
    assert!((expires_at - expected).abs() <= 2);
}

#[test]
fn test_jwt_wrong_key_rejected() {
    let (token, _) = create_jwt("abc", None, SIGNING_KEY, Duration::from_secs(3600)).unwrap();
    assert!(verify_jwt(&token, b"some_other_key_32_bytes_long!!!!").is_err());
}

#[test]
fn test_expired_jwt_rejected() {
    // Past the default 60 second leeway.
    let past = now() - 120;
    let expired = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &ExternalClaims {
            sub: "abc".to_string(),
            exp: past as usize,
            iat: (past - 3600) as usize,
        },
        &jsonwebtoken::EncodingKey::from_secret(SIGNING_KEY),
    )
    .unwrap();

    assert!(verify_jwt(&expired, SIGNING_KEY).is_err());
}

#[test]
fn test_bearer_token_parsing() {
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(bearer_token(&headers), None);

    headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
    assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

    headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
    assert_eq!(bearer_token(&headers), None);

    headers.insert("authorization", "Bearer ".parse().unwrap());
    assert_eq!(bearer_token(&headers), None);
}
