//! Generation gating and completion handlers.
//!
//! `authorize` runs before a generation is sent to the provider and decides
//! free, paid, or payment required. `completed` is the pipeline's
//! generation-completed event and is the only place free usage is recorded.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use songgate_core::{
    AccountId, ConsumeOutcome, GenerationId, GuestId, Identity, TransactionId,
};

use crate::auth::{Caller, ServiceAuth};
use crate::error::{ApiError, PaymentRequiredReason};
use crate::state::AppState;

// ============================================================================
// Authorize
// ============================================================================

/// Request body for authorizing a generation.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeRequest {
    /// Purchased credit to spend if the free generation is used up.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// How a generation was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The identity's free generation.
    Free,
    /// A purchased credit was spent.
    Paid,
}

/// Authorization response.
#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    /// How the generation is funded.
    pub decision: Decision,
    /// Free generations used so far.
    pub free_credits_used: i64,
    /// The credit spent, for paid generations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Decide whether the caller may generate, spending a credit if needed.
///
/// Free usage is not recorded here; the pipeline records it once the
/// generation has actually been accepted.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let status = state.ledger.evaluate(&caller).await?;

    if status.is_free {
        return Ok(Json(AuthorizeResponse {
            decision: Decision::Free,
            free_credits_used: status.free_credits_used,
            transaction_id: None,
        }));
    }

    let Some(raw_tx) = req.transaction_id else {
        tracing::info!(
            account_id = ?caller.account,
            guest_id = ?caller.guest.as_ref().map(GuestId::as_str),
            free_credits_used = status.free_credits_used,
            "Free quota exhausted, payment required"
        );
        return Err(ApiError::PaymentRequired {
            reason: PaymentRequiredReason::FreeQuotaExhausted,
            free_credits_used: status.free_credits_used,
            transaction_id: None,
        });
    };
    let transaction_id = TransactionId::new(raw_tx)?;

    let payment_required = |reason| ApiError::PaymentRequired {
        reason,
        free_credits_used: status.free_credits_used,
        transaction_id: Some(transaction_id.as_str().to_string()),
    };

    let Some(credit) = state.ledger.payment_credit(&transaction_id).await? else {
        return Err(payment_required(PaymentRequiredReason::CreditNotFound));
    };

    if !state.ledger.credit_owned_by(&credit, &caller).await? {
        tracing::warn!(
            transaction_id = %transaction_id,
            owner = %credit.owner,
            account_id = ?caller.account,
            "Credit offered by a caller that does not own it"
        );
        return Err(ApiError::Forbidden);
    }

    match state.ledger.consume_paid_credit(&transaction_id).await? {
        ConsumeOutcome::Consumed { transaction_id, .. } => Ok(Json(AuthorizeResponse {
            decision: Decision::Paid,
            free_credits_used: status.free_credits_used,
            transaction_id: Some(transaction_id.as_str().to_string()),
        })),
        ConsumeOutcome::AlreadyConsumed => Err(payment_required(
            PaymentRequiredReason::CreditAlreadyConsumed,
        )),
        ConsumeOutcome::NotFound => Err(payment_required(PaymentRequiredReason::CreditNotFound)),
    }
}

// ============================================================================
// Completed
// ============================================================================

/// Generation-completed event from the pipeline.
#[derive(Debug, Deserialize)]
pub struct CompletedRequest {
    /// Song id; the idempotency key for recording.
    pub generation_id: String,
    /// Requesting guest, if any.
    #[serde(default)]
    pub guest_id: Option<String>,
    /// Requesting account, if any. Wins over `guest_id`.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Credit that funded the generation, if it was paid.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Advisory client address.
    #[serde(default)]
    pub last_known_address: Option<String>,
}

/// Response after recording a completed generation.
#[derive(Debug, Serialize)]
pub struct CompletedResponse {
    /// Whether this call wrote the record.
    pub recorded: bool,
    /// Whether the generation id had been recorded before.
    pub duplicate: bool,
    /// Ledger row the generation was attributed to.
    pub key: String,
    /// Free usage of that row after the write.
    pub free_credits_used: i64,
}

/// Record a completed generation.
pub async fn completed(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(req): Json<CompletedRequest>,
) -> Result<Json<CompletedResponse>, ApiError> {
    let generation_id = GenerationId::new(req.generation_id)?;
    let identity = event_identity(req.account_id.as_deref(), req.guest_id.as_deref())?;

    tracing::debug!(
        service = %auth.service_name,
        generation_id = %generation_id,
        identity = %identity,
        "Generation completed event"
    );

    let outcome = match req.transaction_id {
        Some(raw_tx) => {
            let transaction_id = TransactionId::new(raw_tx)?;
            state
                .ledger
                .record_paid_generation(&identity, generation_id, transaction_id)
                .await?
        }
        None => {
            state
                .ledger
                .record_free_use(&identity, generation_id, req.last_known_address.as_deref())
                .await?
        }
    };

    Ok(Json(CompletedResponse {
        recorded: !outcome.duplicate,
        duplicate: outcome.duplicate,
        key: outcome.target.to_string(),
        free_credits_used: outcome.entry.map_or(0, |e| e.free_credits_used),
    }))
}

/// Identity named by an event body; the account wins when both are given.
pub(crate) fn event_identity(
    account_id: Option<&str>,
    guest_id: Option<&str>,
) -> Result<Identity, ApiError> {
    match (account_id, guest_id) {
        (Some(account), _) => Ok(Identity::Account(account.parse::<AccountId>()?)),
        (None, Some(guest)) => Ok(Identity::Guest(GuestId::new(guest)?)),
        (None, None) => Err(ApiError::BadRequest(
            "guest_id or account_id is required".into(),
        )),
    }
}
