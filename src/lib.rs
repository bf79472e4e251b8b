// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! F3ociety: client core and backend functions for a crypto social network
//!
//! The client core decides, for every session change, whether the user must
//! finish profile setup or can go straight to the feed. The backend half
//! serves the functions that core talks to (user sync and wallet sign-in).

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::UserDatabase;
use services::WalletVerifier;
use std::sync::Arc;

/// Shared application state of the functions server.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn UserDatabase>,
    pub wallet: WalletVerifier,
}

impl AppState {
    pub fn new(config: Config, db: Arc<dyn UserDatabase>) -> Self {
        let wallet = WalletVerifier::new(&config, db.clone());
        Self { config, db, wallet }
    }
}
