//! Micro-donation platform backend — entry point.
//!
//! Serves an Axum REST API for donors and admins over SQLite, and runs a
//! timer-driven background sweep that transitions causes past their end
//! date from `active` to `completed`.

mod api;
mod audit;
mod config;
mod db;
mod donations;
mod errors;
mod expiry;
mod models;
mod twofactor;

#[cfg(test)]
mod test_expiry;
#[cfg(test)]
mod test_twofactor;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use expiry::SweeperState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // Environment overrides for the stored platform settings.
    if config.min_donation_enabled.is_some() || config.min_donation_amount.is_some() {
        let stored = db::get_platform_config(&pool).await?;
        db::set_platform_config(
            &pool,
            config.min_donation_enabled.unwrap_or(stored.min_donation_enabled),
            config.min_donation_amount.unwrap_or(stored.min_donation_amount),
        )
        .await?;
    }

    // ─── Background expiry sweep ──────────────────────────
    let shutdown = CancellationToken::new();
    let sweeper_state = Arc::new(SweeperState {
        pool: pool.clone(),
        config: config.clone(),
    });
    let sweeper = tokio::spawn(expiry::run(sweeper_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { pool });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/users", post(api::create_user))
        .route("/users/:id", get(api::get_user))
        .route("/causes", get(api::list_causes).post(api::create_cause))
        .route("/causes/:id", get(api::get_cause))
        .route("/causes/:id/donations", get(api::get_cause_donations))
        .route("/causes/:id/archive", post(api::archive_cause))
        .route("/donations", post(api::create_donation))
        .route("/donations/batch", post(api::create_donation_batch))
        .route("/admin/sweep", post(api::run_sweep))
        .route("/admin/audit", get(api::list_audit))
        .route(
            "/admin/config",
            get(api::get_config).put(api::update_config),
        )
        .route("/2fa/setup", post(api::two_factor_setup))
        .route("/2fa/enable", post(api::two_factor_enable))
        .route("/2fa/verify", post(api::two_factor_verify))
        .route("/2fa/disable", post(api::two_factor_disable))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;

    Ok(())
}
