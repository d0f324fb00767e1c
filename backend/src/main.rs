mod aggregate;
mod api;
mod compute;
mod config;
mod coprocessor;
mod db;
mod decryption;
mod encryption;
mod errors;
mod gateway;
mod keys;
mod models;
mod notifier;
mod orchestrator;
mod state;

#[cfg(test)]
mod testutil;

use crate::config::Config;
use crate::errors::ApiError;
use crate::keys::KeyStore;
use crate::state::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    // Store local state under backend/data (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(|e| ApiError::Config(format!("data dir: {e}")))?;

    let db_path = config.data_dir.join("ledger.sqlite");
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());

    let db = db::connect(&db_url).await?;
    db::init_schema(&db).await?;

    let keys = Arc::new(KeyStore::persistent(&config.data_dir));
    let state = AppState::new(db, keys, &config);

    // Key setup can take a while on first start; serve reads meanwhile.
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.refresh().await {
            tracing::warn!(error = %e, "initial refresh failed");
        }
        match orchestrator.initialize_compute().await {
            Ok(()) => tracing::info!("compute initialized"),
            Err(e) => tracing::warn!(error = %e, "compute initialization failed"),
        }
    });

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .map_err(|e| ApiError::Config(format!("bind {}: {e}", config.addr)))?;

    tracing::info!(addr = %config.addr, ledger = %config.ledger_address, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}
