//! Usage ledger rows and the free-quota rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Identity, LedgerKey};
use crate::ids::AccountId;

/// Free generations granted to each identity over its lifetime.
pub const FREE_GENERATIONS_PER_IDENTITY: i64 = 1;

/// One row of the usage ledger.
///
/// `free_credits_used` is never negative and only grows, except when the
/// reconciler overwrites it with the value derived from completed generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    /// Natural key (`guest:<id>` or `account:<uuid>`).
    pub key: LedgerKey,

    /// Owning account, set for account rows and for merged history.
    pub account_id: Option<AccountId>,

    /// Free generations consumed.
    pub free_credits_used: i64,

    /// Advisory client address; never used for authorization.
    pub last_known_address: Option<String>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl UsageLedgerEntry {
    /// A fresh row for an identity with no usage yet.
    #[must_use]
    pub fn new(identity: &Identity, now: DateTime<Utc>) -> Self {
        Self {
            key: identity.ledger_key(),
            account_id: identity.account_id(),
            free_credits_used: 0,
            last_known_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the identity still has its free generation.
    #[must_use]
    pub fn has_free_generation(&self) -> bool {
        self.free_credits_used < FREE_GENERATIONS_PER_IDENTITY
    }

    /// Apply one free use in place.
    ///
    /// Stores that cannot express the increment as a single statement call
    /// this while holding the row lock.
    pub fn record_free_use(&mut self, address: Option<&str>, now: DateTime<Utc>) {
        self.free_credits_used = self.free_credits_used.saturating_add(1);
        if let Some(address) = address {
            self.last_known_address = Some(address.to_string());
        }
        self.updated_at = now;
    }
}

/// Answer to "is the next generation free?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Whether the next generation is free.
    pub is_free: bool,
    /// Free generations consumed so far.
    pub free_credits_used: i64,
}

impl QuotaStatus {
    /// Evaluate the quota rule against a ledger row.
    ///
    /// A missing row is the zero-usage baseline.
    #[must_use]
    pub fn from_entry(entry: Option<&UsageLedgerEntry>) -> Self {
        Self {
            is_free: entry.map_or(true, UsageLedgerEntry::has_free_generation),
            free_credits_used: entry.map_or(0, |e| e.free_credits_used),
        }
    }
}

/// Result of recording a completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// The ledger row the generation was attributed to, after the write.
    ///
    /// `None` only for a paid generation by an identity with no row yet.
    pub entry: Option<UsageLedgerEntry>,

    /// The row key the write targeted (after guest link resolution).
    pub target: LedgerKey,

    /// Whether this generation id had already been recorded.
    pub duplicate: bool,
}
