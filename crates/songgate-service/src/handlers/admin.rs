//! Admin handlers for the consistency reconciler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use songgate_core::{ReconcileReport, SweepSummary};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::generations::event_identity;
use crate::state::AppState;

/// Reconcile request; the account wins when both ids are given.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    /// Guest to audit.
    #[serde(default)]
    pub guest_id: Option<String>,
    /// Account to audit.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Sweep request.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Ledger keys fetched per page; defaults to the configured batch size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Reconcile one identity's ledger row against completed generations.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let identity = event_identity(req.account_id.as_deref(), req.guest_id.as_deref())?;

    let report = state.ledger.reconcile(&identity).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        key = %report.key,
        before = report.before,
        after = report.after,
        corrected = report.corrected,
        "Reconcile requested"
    );

    Ok(Json(report))
}

/// Run a full reconciliation sweep now.
pub async fn sweep(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(req): Json<SweepRequest>,
) -> Result<Json<SweepSummary>, ApiError> {
    let batch_size = req
        .batch_size
        .filter(|n| *n > 0)
        .unwrap_or(state.config.reconcile_batch_size);

    tracing::info!(admin_id = %admin.admin_id, batch_size, "Sweep requested");

    let summary = state.ledger.sweep(batch_size).await?;
    Ok(Json(summary))
}
