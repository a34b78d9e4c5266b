//! Purchased, single-use generation credits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::ids::TransactionId;

/// Credits granted by one confirmed payment.
pub const CREDITS_PER_TRANSACTION: i64 = 1;

/// One purchased allotment, created when the processor confirms a payment.
///
/// `available_credits` moves from 1 to 0 exactly once; the store enforces the
/// transition with a conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCredit {
    /// Processor transaction id (unique).
    pub transaction_id: TransactionId,

    /// Credits left to spend.
    pub available_credits: i64,

    /// When the credit was spent.
    pub consumed_at: Option<DateTime<Utc>>,

    /// Identity the payment was made for.
    pub owner: Identity,

    /// Amount charged, as reported by the processor. Informational.
    pub amount_cents: i64,

    /// When the payment was confirmed.
    pub created_at: DateTime<Utc>,
}

impl PaymentCredit {
    /// A freshly confirmed payment.
    #[must_use]
    pub fn confirmed(
        transaction_id: TransactionId,
        owner: Identity,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id,
            available_credits: CREDITS_PER_TRANSACTION,
            consumed_at: None,
            owner,
            amount_cents,
            created_at: now,
        }
    }

    /// Whether the credit can still be spent.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available_credits > 0
    }
}

/// Result of an attempt to spend a payment credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// This call performed the 1 → 0 transition.
    Consumed {
        /// The credit that was spent.
        transaction_id: TransactionId,
        /// When it was spent.
        consumed_at: DateTime<Utc>,
    },
    /// The credit exists but its single use is already gone.
    AlreadyConsumed,
    /// No credit exists for the transaction id.
    NotFound,
}

impl ConsumeOutcome {
    /// Whether this call spent the credit.
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        matches!(self, Self::Consumed { .. })
    }

    /// Short label for logs and API responses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Consumed { .. } => "consumed",
            Self::AlreadyConsumed => "already_consumed",
            Self::NotFound => "not_found",
        }
    }
}
