//! Error types for songgate ledger operations.
//!
//! Outcomes the paywall expects (no ledger row, a credit already spent, a
//! merge with nothing to merge) are values, not errors. Errors here are the
//! conditions a caller must not paper over.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The backing store timed out or could not be reached. Retryable; never
    /// to be read as "credit available" or "credit exhausted".
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A concurrent insert or merge violated a natural-key uniqueness
    /// constraint. Callers retry once.
    #[error("uniqueness race on {key}")]
    UniquenessRace {
        /// Row or constraint that conflicted.
        key: String,
    },

    /// The store returned something it should never hold.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The request carried neither a guest nor an account identifier.
    #[error("request carries no guest or account identifier")]
    Anonymous,
}

impl LedgerError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::UniquenessRace { .. })
    }
}
