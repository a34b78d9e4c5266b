//! songgate service - free quota, identity merge and payment credits.
//!
//! This is the main entry point for the songgate service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songgate_service::{create_router, AppState, ServiceConfig};
use songgate_store::{MemoryStore, PgStore, PgStoreOptions, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,songgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting songgate service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        postgres = %config.database_url.is_some(),
        data_dir = ?config.data_dir,
        store_timeout_ms = config.store_timeout_ms,
        reconcile_interval_seconds = config.reconcile_interval_seconds,
        stripe_configured = %config.stripe_webhook_secret.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    // Build app state
    let state = AppState::new(store, config.clone());

    if let Some(interval) = config.reconcile_interval() {
        tracing::info!(
            interval_seconds = interval.as_secs(),
            batch_size = config.reconcile_batch_size,
            "Scheduling reconciliation sweeps"
        );
        let _sweeper = state
            .ledger
            .clone()
            .spawn_sweeper(interval, config.reconcile_batch_size);
    }

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Pick the backend: PostgreSQL, then `RocksDB`, then in-memory.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let options = PgStoreOptions {
            max_connections: config.database_max_connections,
            acquire_timeout: config.store_timeout(),
        };
        return Ok(Arc::new(PgStore::connect(url, &options).await?));
    }

    #[cfg(feature = "rocksdb-backend")]
    if let Some(data_dir) = &config.data_dir {
        tracing::info!(path = %data_dir, "Opening RocksDB store");
        return Ok(Arc::new(songgate_store::RocksStore::open(data_dir)?));
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    if config.data_dir.is_some() {
        tracing::warn!("DATA_DIR set but the rocksdb-backend feature is disabled");
    }

    tracing::warn!("No DATABASE_URL configured - using in-memory store, data will not persist");
    Ok(Arc::new(MemoryStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
