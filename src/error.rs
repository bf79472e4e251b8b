// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the client core and the functions server.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Wallet provider not installed")]
    WalletUnavailable,

    #[error("Wallet request rejected: {0}")]
    WalletRejected(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Local cache error: {0}")]
    Cache(String),

    /// A response arrived for a session that is no longer current.
    #[error("Superseded by a newer session")]
    Superseded,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Network or backend failures that may succeed on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Backend(_) | AppError::Database(_))
    }

    /// Credential, code or signature rejections the user can act on.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Unauthorized
                | AppError::InvalidToken
                | AppError::AuthRejected(_)
                | AppError::WalletRejected(_)
        )
    }

    /// Message suitable for display to the user. Internal detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized | AppError::InvalidToken => {
                "Your session has expired. Please sign in again.".to_string()
            }
            AppError::AuthRejected(_) => {
                "Sign-in failed. Check your credentials and try again.".to_string()
            }
            AppError::WalletUnavailable => {
                "No wallet found. Please install a wallet extension to continue.".to_string()
            }
            AppError::WalletRejected(_) => {
                "The wallet request was rejected. Please try again.".to_string()
            }
            AppError::BadRequest(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::NotFound(_) => "We couldn't find what you were looking for.".to_string(),
            AppError::Backend(_) | AppError::Database(_) => {
                "We're having trouble reaching the server. Showing saved data.".to_string()
            }
            AppError::Cache(_) | AppError::Superseded | AppError::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::AuthRejected(_) => (StatusCode::UNAUTHORIZED, "auth_rejected"),
            AppError::WalletUnavailable => (StatusCode::BAD_REQUEST, "wallet_unavailable"),
            AppError::WalletRejected(_) => (StatusCode::BAD_REQUEST, "wallet_rejected"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::Superseded => (StatusCode::CONFLICT, "superseded"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();

        let details = match &self {
            AppError::AuthRejected(msg)
            | AppError::WalletRejected(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Backend(msg) => Some(msg.clone()),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                None
            }
            AppError::Cache(msg) => {
                tracing::error!(error = %msg, "Cache error");
                None
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            AppError::Unauthorized
            | AppError::InvalidToken
            | AppError::WalletUnavailable
            | AppError::Superseded => None,
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
