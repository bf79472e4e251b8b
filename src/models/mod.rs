// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod session;
pub mod social;
pub mod user;

pub use session::Session;
pub use social::{NewTweet, Notification, NotificationKind, Tweet};
pub use user::{ProfileSetupForm, ProviderMetadata, UserPatch, UserRecord};
