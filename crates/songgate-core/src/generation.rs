//! Completed generations, the ground truth the reconciler audits against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::ids::{GenerationId, TransactionId};

/// A generation that actually completed.
///
/// `owner` is the identity that requested it. Stores attribute the record to
/// the ledger row `owner` resolves to at write time, so a guest's history
/// keeps its own identity until the guest is merged, and later generations
/// land on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Song id from the generation pipeline (unique).
    pub generation_id: GenerationId,

    /// Identity that requested the generation.
    pub owner: Identity,

    /// How the generation was paid for.
    pub funding: Funding,

    /// When the pipeline reported completion.
    pub completed_at: DateTime<Utc>,
}

impl GenerationRecord {
    /// A generation that used the identity's free credit.
    #[must_use]
    pub fn free(generation_id: GenerationId, owner: Identity, now: DateTime<Utc>) -> Self {
        Self {
            generation_id,
            owner,
            funding: Funding::Free,
            completed_at: now,
        }
    }

    /// A generation funded by a payment credit.
    #[must_use]
    pub fn paid(
        generation_id: GenerationId,
        owner: Identity,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            generation_id,
            owner,
            funding: Funding::Paid { transaction_id },
            completed_at: now,
        }
    }

    /// Whether this generation counts against the free quota.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.funding, Funding::Free)
    }

    /// The funding transaction, for paid generations.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match &self.funding {
            Funding::Free => None,
            Funding::Paid { transaction_id } => Some(transaction_id),
        }
    }
}

/// How a generation was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Funding {
    /// The identity's free credit.
    Free,
    /// A purchased credit.
    Paid {
        /// The credit's transaction id.
        transaction_id: TransactionId,
    },
}
