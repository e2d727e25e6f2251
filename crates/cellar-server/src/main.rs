//! Cellar Server — application entry point.

use std::sync::Arc;
use std::time::Duration;

use cellar_billing::PayPalClient;
use cellar_core::{Clock, SystemClock};
use cellar_db::DbManager;
use cellar_server::{AppState, ServerConfig, app};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cellar=info,info")),
        )
        .json()
        .init();

    tracing::info!("Starting Cellar server...");

    let config = ServerConfig::from_env();
    config.billing.validate()?;

    let db = DbManager::connect(&config.db).await?;
    cellar_db::run_migrations(db.client()).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = PayPalClient::new(config.billing.clone())?;
    let state = Arc::new(AppState::new(
        db.client().clone(),
        config.access.clone(),
        config.billing.clone(),
        config.dedicated.clone(),
        provider,
        clock,
    ));

    let counters = state.counters.clone();
    let purge_every = Duration::from_secs(config.counter_purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            let purged = counters.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired rate-limit counters purged");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    let report = state.router.close().await;
    for (store, error) in &report.failures {
        tracing::warn!(store = %store, error = %error, "Store handle did not close cleanly");
    }
    tracing::info!(closed = report.closed, "Cellar server stopped.");
    Ok(())
}
