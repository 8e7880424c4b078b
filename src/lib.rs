//! Storefront API: session gateway and order lifecycle
//!
//! JWT access tokens with rotating refresh tokens, a role-tiered authorization
//! gate, and orders that move IN_PROGRESS → PROCESSED → COMPLETED with stock
//! taken atomically at creation.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod orders;
pub mod routes;
pub mod state;

pub use config::Config;
pub use routes::create_router;
pub use state::AppState;

use std::time::Duration;

/// Periodically delete expired refresh tokens
pub fn spawn_token_purge(auth: std::sync::Arc<auth::AuthService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match auth.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!("Purged {} expired refresh tokens", purged),
                Err(e) => tracing::error!("Refresh token purge failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests;
