// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! F3ociety functions server
//!
//! Serves the user sync and wallet sign-in functions the client core calls.

use f3ociety::{
    config::Config,
    db::{FirestoreDb, MemoryDb, UserDatabase},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting F3ociety functions server");

    // `USE_MEMORY_DB=1` runs without Firestore (local development only)
    let db: Arc<dyn UserDatabase> = if std::env::var("USE_MEMORY_DB").is_ok_and(|v| v == "1") {
        tracing::warn!("Using in-memory database, data is lost on restart");
        Arc::new(MemoryDb::new())
    } else {
        Arc::new(FirestoreDb::new(&config.gcp_project_id).await?)
    };

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), db));

    // Build router
    let app = f3ociety::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("f3ociety=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
