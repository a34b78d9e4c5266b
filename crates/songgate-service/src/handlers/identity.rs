//! Login hook: fold the visitor's guest history into their account.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use songgate_core::{GuestId, LedgerError};

use crate::auth::{guest_header, AuthAccount};
use crate::error::ApiError;
use crate::handlers::forwarded_address;
use crate::state::AppState;

/// Merge request. Every field is optional; the guest id may come from the
/// `X-Guest-Id` header instead.
#[derive(Debug, Default, Deserialize)]
pub struct MergeRequest {
    /// Guest identifier stored on the client.
    #[serde(default)]
    pub guest_id: Option<String>,
    /// Advisory client address.
    #[serde(default)]
    pub last_known_address: Option<String>,
}

/// Merge response, for the front end's diagnostic logging.
#[derive(Debug, Serialize)]
pub struct MergeResponse {
    /// Whether a guest row was folded in by this call.
    pub merged: bool,
    /// The account's free usage after the call, when known.
    pub combined_free_credits_used: Option<i64>,
    /// The merge could not run now and should be retried at the next login.
    pub deferred: bool,
}

/// Merge the caller's guest history into their account.
///
/// Never fails the login because of the store: an outage is logged and
/// reported as `deferred`, and nothing is marked complete.
pub async fn merge(
    State(state): State<Arc<AppState>>,
    auth: AuthAccount,
    headers: HeaderMap,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    let guest = match req.guest_id {
        Some(raw) => Some(GuestId::new(raw)?),
        None => guest_header(&headers)?,
    };

    let Some(guest) = guest else {
        tracing::debug!(account_id = %auth.account_id, "Login without guest id, nothing to merge");
        return Ok(Json(MergeResponse {
            merged: false,
            combined_free_credits_used: None,
            deferred: false,
        }));
    };

    let address = req
        .last_known_address
        .or_else(|| forwarded_address(&headers));

    match state
        .ledger
        .merge(&guest, auth.account_id, address.as_deref())
        .await
    {
        Ok(result) => Ok(Json(MergeResponse {
            merged: result.merged,
            combined_free_credits_used: Some(result.combined_free_credits_used),
            deferred: false,
        })),
        Err(e @ (LedgerError::StoreUnavailable(_) | LedgerError::Storage(_))) => {
            tracing::warn!(
                guest_id = %guest,
                account_id = %auth.account_id,
                error = %e,
                "Merge deferred to next login"
            );
            Ok(Json(MergeResponse {
                merged: false,
                combined_free_credits_used: None,
                deferred: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
