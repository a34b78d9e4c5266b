//! Storage layer for songgate.
//!
//! The store is the only shared mutable state in the system and the sole
//! arbiter of concurrency: every operation on the [`Store`] trait is atomic
//! at the store level. Nothing here caches ledger state between calls.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, for production.
//! - [`MemoryStore`]: in-process, for tests and local development.
//! - `RocksStore`: embedded `RocksDB` transactions (`rocksdb-backend` feature).
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use songgate_core::{GenerationId, GenerationRecord, GuestId, Identity};
//! use songgate_store::{MemoryStore, Store};
//!
//! # async fn example() -> songgate_store::Result<()> {
//! let store = MemoryStore::new();
//! let guest = Identity::Guest(GuestId::new("g1").unwrap());
//!
//! let record = GenerationRecord::free(GenerationId::new("song-1").unwrap(), guest.clone(), Utc::now());
//! let outcome = store.record_generation(&record, None).await?;
//! assert_eq!(outcome.entry.unwrap().free_credits_used, 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgStoreOptions};
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use songgate_core::{
    AccountId, ConsumeOutcome, GenerationRecord, GuestId, Identity, LedgerKey, MergeResult,
    PaymentCredit, ReconcileReport, RecordOutcome, TransactionId, UsageLedgerEntry,
};

/// The storage trait defining all ledger operations.
///
/// Each method is a single unit of work against the backing store. Backends
/// must not implement any of them as an unsynchronised read followed by a
/// write.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Health
    // =========================================================================

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if it is not.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    /// Get a ledger row by its natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn entry(&self, key: &LedgerKey) -> Result<Option<UsageLedgerEntry>>;

    /// The account a guest has been merged into, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn guest_link(&self, guest: &GuestId) -> Result<Option<AccountId>>;

    /// The row key that governs an identity, following guest links.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn resolve_key(&self, identity: &Identity) -> Result<LedgerKey> {
        match identity {
            Identity::Account(_) => Ok(identity.ledger_key()),
            Identity::Guest(guest) => Ok(match self.guest_link(guest).await? {
                Some(account_id) => Identity::Account(account_id).ledger_key(),
                None => identity.ledger_key(),
            }),
        }
    }

    /// Keys of all ledger rows after `after`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ledger_keys(&self, after: Option<&LedgerKey>, limit: usize) -> Result<Vec<LedgerKey>>;

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Record a completed generation.
    ///
    /// In one atomic unit: resolves the owner through guest links, inserts the
    /// generation record, and for a free generation increments (or creates)
    /// the target row. A generation id that was already recorded changes
    /// nothing and reports `duplicate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_generation(
        &self,
        record: &GenerationRecord,
        address: Option<&str>,
    ) -> Result<RecordOutcome>;

    /// Create a payment credit. Returns `false` if the transaction id already
    /// has one; the existing credit is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_payment_credit(&self, credit: &PaymentCredit) -> Result<bool>;

    /// Get a payment credit by transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn payment_credit(&self, transaction_id: &TransactionId)
        -> Result<Option<PaymentCredit>>;

    /// Spend one unit of a payment credit if and only if one is available,
    /// as a single conditional update.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn consume_payment_credit(
        &self,
        transaction_id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;

    // =========================================================================
    // Merge & Reconcile
    // =========================================================================

    /// Fold a guest's row into an account's row in one transaction.
    ///
    /// Deletes the guest row before writing the account row, then links the
    /// guest to the account. A guest without a row is a no-op.
    ///
    /// # Errors
    ///
    /// - `StoreError::UniqueViolation` if a concurrent writer won a race on a
    ///   natural key.
    /// - Any other error if the database operation fails.
    async fn merge_guest(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeResult>;

    /// Recompute a row's free usage from completed generations and overwrite
    /// it when it has drifted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn reconcile(&self, key: &LedgerKey, now: DateTime<Utc>) -> Result<ReconcileReport>;
}
