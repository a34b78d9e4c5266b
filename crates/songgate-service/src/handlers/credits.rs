//! Payment credit handlers (service API key).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use songgate_core::{ConsumeOutcome, PaymentCredit, TransactionId};

use crate::auth::ServiceAuth;
use crate::error::{ApiError, PaymentRequiredReason};
use crate::state::AppState;

/// Payment credit state.
#[derive(Debug, Serialize)]
pub struct CreditResponse {
    /// Processor transaction id.
    pub transaction_id: String,
    /// Remaining uses (0 or 1).
    pub available_credits: i64,
    /// When the credit was spent.
    pub consumed_at: Option<DateTime<Utc>>,
    /// Owning identity (`guest:<id>` or `account:<uuid>`).
    pub owner: String,
    /// Processor-reported amount.
    pub amount_cents: i64,
    /// When the payment was confirmed.
    pub created_at: DateTime<Utc>,
}

impl From<PaymentCredit> for CreditResponse {
    fn from(credit: PaymentCredit) -> Self {
        Self {
            transaction_id: credit.transaction_id.as_str().to_string(),
            available_credits: credit.available_credits,
            consumed_at: credit.consumed_at,
            owner: credit.owner.to_string(),
            amount_cents: credit.amount_cents,
            created_at: credit.created_at,
        }
    }
}

/// Consume response.
#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    /// Always true; a credit that cannot be spent is a 402.
    pub consumed: bool,
    /// The credit that was spent.
    pub transaction_id: String,
    /// When it was spent.
    pub consumed_at: DateTime<Utc>,
}

/// Get a payment credit.
pub async fn get_credit(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(transaction_id): Path<String>,
) -> Result<Json<CreditResponse>, ApiError> {
    let transaction_id = TransactionId::new(transaction_id)?;

    let credit = state
        .ledger
        .payment_credit(&transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("credit {transaction_id}")))?;

    Ok(Json(credit.into()))
}

/// Spend a payment credit.
pub async fn consume_credit(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(transaction_id): Path<String>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let transaction_id = TransactionId::new(transaction_id)?;

    tracing::debug!(
        service = %auth.service_name,
        transaction_id = %transaction_id,
        "Consume requested"
    );

    let payment_required = |reason| ApiError::PaymentRequired {
        reason,
        free_credits_used: 0,
        transaction_id: Some(transaction_id.as_str().to_string()),
    };

    match state.ledger.consume_paid_credit(&transaction_id).await? {
        ConsumeOutcome::Consumed {
            transaction_id,
            consumed_at,
        } => Ok(Json(ConsumeResponse {
            consumed: true,
            transaction_id: transaction_id.as_str().to_string(),
            consumed_at,
        })),
        ConsumeOutcome::AlreadyConsumed => Err(payment_required(
            PaymentRequiredReason::CreditAlreadyConsumed,
        )),
        ConsumeOutcome::NotFound => Err(payment_required(PaymentRequiredReason::CreditNotFound)),
    }
}
