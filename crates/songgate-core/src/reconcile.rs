//! Reconciliation arithmetic: the free-usage value implied by ground truth.

use serde::{Deserialize, Serialize};

use crate::identity::LedgerKey;
use crate::ledger::FREE_GENERATIONS_PER_IDENTITY;

/// Free usage a ledger row should hold.
///
/// `constituent_counts` holds, for each identity whose history lives in the
/// row (the row's own identity plus every guest merged into it), the number
/// of completed free generations that identity requested. Each identity
/// contributes at most its free allowance; paid generations are tracked by
/// payment credits and never appear here.
#[must_use]
pub fn expected_free_credits<I>(constituent_counts: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    constituent_counts
        .into_iter()
        .map(|count| count.clamp(0, FREE_GENERATIONS_PER_IDENTITY))
        .sum()
}

/// Before/after values of one reconciliation, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Row that was audited.
    pub key: LedgerKey,
    /// Free usage stored before the audit.
    pub before: i64,
    /// Free usage stored after the audit.
    pub after: i64,
    /// Whether the stored value was overwritten.
    pub corrected: bool,
}

impl ReconcileReport {
    /// Build a report from the stored and expected values.
    #[must_use]
    pub fn new(key: LedgerKey, before: i64, after: i64) -> Self {
        Self {
            key,
            before,
            after,
            corrected: before != after,
        }
    }
}

/// Totals from a full ledger sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Rows audited.
    pub scanned: u64,
    /// Rows overwritten.
    pub corrected: u64,
    /// Rows whose audit failed (left untouched).
    pub failed: u64,
}
