//! Merge arithmetic for folding a guest's history into an account.
//!
//! Stores run [`combine`] inside the transaction that deletes the guest row,
//! so every backend merges the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::ids::AccountId;
use crate::ledger::UsageLedgerEntry;

/// Outcome of a merge, reported back to the login flow for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Whether a guest row was folded in by this call.
    pub merged: bool,
    /// The account's free usage after the call.
    pub combined_free_credits_used: i64,
}

impl MergeResult {
    /// No guest row existed; the account is unchanged.
    #[must_use]
    pub const fn noop(account_free_credits_used: i64) -> Self {
        Self {
            merged: false,
            combined_free_credits_used: account_free_credits_used,
        }
    }
}

/// Compute the account row that results from merging `guest` into it.
///
/// Counts are summed: a guest and an account are distinct histories until
/// the merge, so both count. A missing account row starts from zero.
#[must_use]
pub fn combine(
    guest: &UsageLedgerEntry,
    account: Option<UsageLedgerEntry>,
    account_id: AccountId,
    last_known_address: Option<&str>,
    now: DateTime<Utc>,
) -> UsageLedgerEntry {
    let mut merged =
        account.unwrap_or_else(|| UsageLedgerEntry::new(&Identity::Account(account_id), now));

    merged.free_credits_used = merged
        .free_credits_used
        .saturating_add(guest.free_credits_used);
    merged.account_id = Some(account_id);
    if let Some(address) = last_known_address {
        merged.last_known_address = Some(address.to_string());
    }
    merged.updated_at = now;
    merged
}
