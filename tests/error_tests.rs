// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use f3ociety::error::AppError;

#[test]
fn test_transient_errors() {
    assert!(AppError::Backend("timeout".to_string()).is_transient());
    assert!(AppError::Database("unavailable".to_string()).is_transient());

    assert!(!AppError::Unauthorized.is_transient());
    assert!(!AppError::BadRequest("bad".to_string()).is_transient());
    assert!(!AppError::Superseded.is_transient());
}

#[test]
fn test_auth_rejections() {
    assert!(AppError::Unauthorized.is_auth_rejection());
    assert!(AppError::InvalidToken.is_auth_rejection());
    assert!(AppError::AuthRejected("bad code".to_string()).is_auth_rejection());
    assert!(AppError::WalletRejected("bad signature".to_string()).is_auth_rejection());

    assert!(!AppError::WalletUnavailable.is_auth_rejection());
    assert!(!AppError::Backend("down".to_string()).is_auth_rejection());
}

#[test]
fn test_user_messages_hide_internals() {
    let err = AppError::Database("firestore: deadline exceeded on users/abc".to_string());
    assert!(!err.user_message().contains("firestore"));

    let err = AppError::Internal(anyhow::anyhow!("secret key mismatch"));
    assert!(!err.user_message().contains("secret"));

    // Validation messages are meant for the user.
    let err = AppError::BadRequest("Username must be 3-30 characters".to_string());
    assert_eq!(err.user_message(), "Username must be 3-30 characters");
}

#[test]
fn test_wallet_unavailable_asks_for_install() {
    assert!(AppError::WalletUnavailable
        .user_message()
        .contains("install a wallet"));
}

#[test]
fn test_status_codes() {
    let cases = [
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::InvalidToken, StatusCode::UNAUTHORIZED),
        (AppError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
        (AppError::BadRequest("x".to_string()), StatusCode::BAD_REQUEST),
        (AppError::Conflict("x".to_string()), StatusCode::CONFLICT),
        (AppError::Backend("x".to_string()), StatusCode::BAD_GATEWAY),
        (
            AppError::Internal(anyhow::anyhow!("x")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, expected) in cases {
        let (status, _) = err.status_and_code();
        assert_eq!(status, expected, "{:?}", err);
        assert_eq!(err.into_response().status(), expected);
    }
}
