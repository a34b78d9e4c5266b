//! Quota evaluation.

use songgate_core::{LedgerError, QuotaStatus, RequestIdentity, Result};

use super::Ledger;

impl Ledger {
    /// Is the caller's next generation free?
    ///
    /// The account identifier wins when both are present; a guest already
    /// merged into an account reads the account's row. A missing row is the
    /// zero-usage baseline and is not created here.
    ///
    /// # Errors
    ///
    /// - `LedgerError::Anonymous` if the request carries no identifier.
    /// - `LedgerError::StoreUnavailable` if the store cannot answer in time.
    pub async fn evaluate(&self, request: &RequestIdentity) -> Result<QuotaStatus> {
        let identity = request.primary().ok_or(LedgerError::Anonymous)?;
        let key = self
            .call("resolve_key", self.store.resolve_key(&identity))
            .await?;
        let entry = self.call("entry", self.store.entry(&key)).await?;
        let status = QuotaStatus::from_entry(entry.as_ref());

        tracing::debug!(
            key = %key,
            is_free = status.is_free,
            free_credits_used = status.free_credits_used,
            "Quota evaluated"
        );

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use songgate_core::{AccountId, GenerationId, GenerationRecord, GuestId};
    use songgate_store::{MemoryStore, Store};

    use super::*;
    use crate::ledger::test_support::FlakyStore;

    fn ledger(store: Arc<dyn Store>) -> Ledger {
        Ledger::new(store, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn fresh_identity_is_free() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let status = ledger
            .evaluate(&RequestIdentity::guest(GuestId::new("g1").unwrap()))
            .await
            .unwrap();

        assert_eq!(
            status,
            QuotaStatus {
                is_free: true,
                free_credits_used: 0
            }
        );
    }

    #[tokio::test]
    async fn account_wins_over_guest() {
        let store = Arc::new(MemoryStore::new());
        let guest = GuestId::new("g1").unwrap();
        let record =
            GenerationRecord::free(GenerationId::new("s1").unwrap(), guest.clone().into(), Utc::now());
        store.record_generation(&record, None).await.unwrap();
        let ledger = ledger(store);

        let both = RequestIdentity {
            guest: Some(guest),
            account: Some(AccountId::generate()),
        };
        assert!(ledger.evaluate(&both).await.unwrap().is_free);
    }

    #[tokio::test]
    async fn anonymous_request_is_rejected() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let err = ledger.evaluate(&RequestIdentity::default()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Anonymous));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_unavailable_not_free() {
        let store = FlakyStore {
            stall: true,
            ..FlakyStore::default()
        };
        let ledger = ledger(Arc::new(store));

        let err = ledger
            .evaluate(&RequestIdentity::guest(GuestId::new("g1").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }
}
