//! Quota status handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Quota status response.
#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    /// Whether the next generation is free.
    pub is_free: bool,
    /// Free generations used so far.
    pub free_credits_used: i64,
}

/// Get the caller's quota status.
///
/// Read-only: polling never creates a ledger row.
pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<QuotaResponse>, ApiError> {
    let status = state.ledger.evaluate(&caller).await?;

    Ok(Json(QuotaResponse {
        is_free: status.is_free,
        free_credits_used: status.free_credits_used,
    }))
}
