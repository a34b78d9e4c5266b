//! The ledger engine.
//!
//! [`Ledger`] owns no state of its own: every decision is made by the
//! [`Store`] in one atomic call, and every call is bounded by the configured
//! store timeout. An elapsed timeout is an error, never an outcome.
//!
//! - [`quota`]: is the next generation free?
//! - [`consumption`]: record free use, grant and spend payment credits
//! - [`merge`]: fold a guest's usage into an account at login
//! - [`reconcile`]: repair drift against completed generations

pub mod consumption;
pub mod merge;
pub mod quota;
pub mod reconcile;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use songgate_core::{LedgerError, Result};
use songgate_store::Store;

/// Entry point for all ledger operations.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    store_timeout: Duration,
}

impl Ledger {
    /// Create an engine over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run one store call under the timeout.
    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = songgate_store::Result<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                let err = LedgerError::from(e);
                if let LedgerError::StoreUnavailable(reason) = &err {
                    tracing::error!(operation, reason = %reason, "Store unavailable");
                }
                err
            }),
            Err(_) => {
                tracing::error!(
                    operation,
                    timeout_ms = %self.store_timeout.as_millis(),
                    "Store call timed out"
                );
                Err(LedgerError::StoreUnavailable(format!(
                    "{operation} timed out after {}ms",
                    self.store_timeout.as_millis()
                )))
            }
        }
    }

    /// Run a store call that can lose a natural-key race, retrying once.
    ///
    /// A second race is reported as `StoreUnavailable`.
    async fn call_retrying<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = songgate_store::Result<T>>,
    {
        match self.call(operation, call()).await {
            Err(LedgerError::UniquenessRace { key }) => {
                tracing::warn!(operation, key = %key, "Uniqueness race, retrying once");
                match self.call(operation, call()).await {
                    Err(LedgerError::UniquenessRace { key }) => {
                        tracing::error!(operation, key = %key, "Uniqueness race persisted after retry");
                        Err(LedgerError::StoreUnavailable(format!(
                            "{operation} lost a uniqueness race twice on {key}"
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Stores that misbehave on purpose.

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use songgate_core::{
        AccountId, ConsumeOutcome, GenerationRecord, GuestId, LedgerKey, MergeResult,
        PaymentCredit, ReconcileReport, RecordOutcome, TransactionId, UsageLedgerEntry,
    };
    use songgate_store::{MemoryStore, Store, StoreError};

    /// Delegates to a [`MemoryStore`], but can stall every call or fail the
    /// first `races` merges with a unique violation.
    #[derive(Default)]
    pub struct FlakyStore {
        pub inner: MemoryStore,
        pub stall: bool,
        pub races: AtomicUsize,
    }

    impl FlakyStore {
        async fn maybe_stall(&self) {
            if self.stall {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn ping(&self) -> songgate_store::Result<()> {
            self.maybe_stall().await;
            self.inner.ping().await
        }

        async fn entry(&self, key: &LedgerKey) -> songgate_store::Result<Option<UsageLedgerEntry>> {
            self.maybe_stall().await;
            self.inner.entry(key).await
        }

        async fn guest_link(&self, guest: &GuestId) -> songgate_store::Result<Option<AccountId>> {
            self.maybe_stall().await;
            self.inner.guest_link(guest).await
        }

        async fn ledger_keys(
            &self,
            after: Option<&LedgerKey>,
            limit: usize,
        ) -> songgate_store::Result<Vec<LedgerKey>> {
            self.inner.ledger_keys(after, limit).await
        }

        async fn record_generation(
            &self,
            record: &GenerationRecord,
            address: Option<&str>,
        ) -> songgate_store::Result<RecordOutcome> {
            self.maybe_stall().await;
            self.inner.record_generation(record, address).await
        }

        async fn insert_payment_credit(&self, credit: &PaymentCredit) -> songgate_store::Result<bool> {
            self.inner.insert_payment_credit(credit).await
        }

        async fn payment_credit(
            &self,
            transaction_id: &TransactionId,
        ) -> songgate_store::Result<Option<PaymentCredit>> {
            self.inner.payment_credit(transaction_id).await
        }

        async fn consume_payment_credit(
            &self,
            transaction_id: &TransactionId,
            now: DateTime<Utc>,
        ) -> songgate_store::Result<ConsumeOutcome> {
            self.maybe_stall().await;
            self.inner.consume_payment_credit(transaction_id, now).await
        }

        async fn merge_guest(
            &self,
            guest: &GuestId,
            account_id: AccountId,
            last_known_address: Option<&str>,
            now: DateTime<Utc>,
        ) -> songgate_store::Result<MergeResult> {
            self.maybe_stall().await;
            let remaining = self.races.load(Ordering::SeqCst);
            if remaining > 0 {
                self.races.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::UniqueViolation {
                    constraint: "usage_ledger_account_id_key".into(),
                });
            }
            self.inner
                .merge_guest(guest, account_id, last_known_address, now)
                .await
        }

        async fn reconcile(
            &self,
            key: &LedgerKey,
            now: DateTime<Utc>,
        ) -> songgate_store::Result<ReconcileReport> {
            self.inner.reconcile(key, now).await
        }
    }
}
