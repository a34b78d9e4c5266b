//! Health check handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Upper bound on the store ping, independent of the configured store timeout.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "ok", or "degraded" when the store is unreachable.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Store status: "ok" or "unavailable".
    pub store: String,
}

/// Health check endpoint.
///
/// Always answers 200 so that load balancers can tell a degraded instance
/// from a dead one.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timeout = PING_TIMEOUT.min(state.config.store_timeout());
    let store_ok = match tokio::time::timeout(timeout, state.store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Store ping failed");
            false
        }
        Err(_) => {
            tracing::warn!("Store ping timed out");
            false
        }
    };

    Json(HealthResponse {
        status: if store_ok { "ok" } else { "degraded" }.to_string(),
        service: "songgate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_ok { "ok" } else { "unavailable" }.to_string(),
    })
}
