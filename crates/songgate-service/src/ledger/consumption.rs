//! Consumption recording: free use, paid generations and payment credits.

use chrono::Utc;

use songgate_core::{
    ConsumeOutcome, GenerationId, GenerationRecord, Identity, PaymentCredit, RecordOutcome,
    RequestIdentity, Result, TransactionId,
};

use super::Ledger;

impl Ledger {
    /// Record a completed free generation.
    ///
    /// Keyed by `generation_id`: a redelivered completion event leaves the
    /// counter alone and reports `duplicate`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached
    /// in time. The counter is then in an unknown state; the reconciler
    /// repairs it.
    pub async fn record_free_use(
        &self,
        identity: &Identity,
        generation_id: GenerationId,
        last_known_address: Option<&str>,
    ) -> Result<RecordOutcome> {
        let record = GenerationRecord::free(generation_id, identity.clone(), Utc::now());
        let outcome = self
            .call_retrying("record_generation", || {
                self.store.record_generation(&record, last_known_address)
            })
            .await?;

        let free_credits_used = outcome.entry.as_ref().map_or(0, |e| e.free_credits_used);
        if outcome.duplicate {
            tracing::warn!(
                generation_id = %record.generation_id,
                key = %outcome.target,
                free_credits_used,
                "Generation already recorded, ledger unchanged"
            );
        } else {
            tracing::info!(
                generation_id = %record.generation_id,
                key = %outcome.target,
                free_credits_used,
                "Free generation recorded"
            );
        }

        Ok(outcome)
    }

    /// Record a completed generation funded by a payment credit.
    ///
    /// Stores ground truth only; free usage is untouched.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn record_paid_generation(
        &self,
        identity: &Identity,
        generation_id: GenerationId,
        transaction_id: TransactionId,
    ) -> Result<RecordOutcome> {
        let record = GenerationRecord::paid(generation_id, identity.clone(), transaction_id, Utc::now());
        let outcome = self
            .call_retrying("record_generation", || self.store.record_generation(&record, None))
            .await?;

        tracing::info!(
            generation_id = %record.generation_id,
            transaction_id = ?record.transaction_id().map(TransactionId::as_str),
            key = %outcome.target,
            duplicate = outcome.duplicate,
            "Paid generation recorded"
        );

        Ok(outcome)
    }

    /// Spend a payment credit, exactly once.
    ///
    /// Of any number of concurrent calls for one credit, exactly one returns
    /// `Consumed`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached
    /// in time. That is never a grant.
    pub async fn consume_paid_credit(&self, transaction_id: &TransactionId) -> Result<ConsumeOutcome> {
        let outcome = self
            .call(
                "consume_payment_credit",
                self.store.consume_payment_credit(transaction_id, Utc::now()),
            )
            .await?;

        if outcome == ConsumeOutcome::AlreadyConsumed {
            tracing::warn!(
                transaction_id = %transaction_id,
                outcome = outcome.as_str(),
                "Payment credit already spent"
            );
        } else {
            tracing::info!(
                transaction_id = %transaction_id,
                outcome = outcome.as_str(),
                "Payment credit consume attempted"
            );
        }

        Ok(outcome)
    }

    /// Create the credit for a confirmed payment.
    ///
    /// Returns `false` if the transaction was already granted; a redelivered
    /// confirmation never restores a spent credit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn grant_paid_credit(
        &self,
        transaction_id: TransactionId,
        owner: Identity,
        amount_cents: i64,
    ) -> Result<bool> {
        let credit = PaymentCredit::confirmed(transaction_id, owner, amount_cents, Utc::now());
        let created = self
            .call_retrying("insert_payment_credit", || {
                self.store.insert_payment_credit(&credit)
            })
            .await?;

        if created {
            tracing::info!(
                transaction_id = %credit.transaction_id,
                owner = %credit.owner,
                amount_cents,
                "Payment credit granted"
            );
        } else {
            tracing::warn!(
                transaction_id = %credit.transaction_id,
                "Payment credit already granted"
            );
        }

        Ok(created)
    }

    /// Look up a payment credit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn payment_credit(&self, transaction_id: &TransactionId) -> Result<Option<PaymentCredit>> {
        self.call("payment_credit", self.store.payment_credit(transaction_id))
            .await
    }

    /// Whether the caller may spend `credit`.
    ///
    /// The owner may, and so may the account a guest owner was merged into.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the link lookup fails.
    pub async fn credit_owned_by(
        &self,
        credit: &PaymentCredit,
        caller: &RequestIdentity,
    ) -> Result<bool> {
        match &credit.owner {
            Identity::Account(owner) => Ok(caller.account == Some(*owner)),
            Identity::Guest(owner) => {
                if caller.guest.as_ref() == Some(owner) {
                    return Ok(true);
                }
                let Some(account) = caller.account else {
                    return Ok(false);
                };
                let linked = self
                    .call("guest_link", self.store.guest_link(owner))
                    .await?;
                Ok(linked == Some(account))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use songgate_core::{AccountId, GuestId, LedgerError};
    use songgate_store::MemoryStore;

    use super::*;
    use crate::ledger::test_support::FlakyStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), Duration::from_secs(1))
    }

    fn guest(id: &str) -> GuestId {
        GuestId::new(id).unwrap()
    }

    fn tx(id: &str) -> TransactionId {
        TransactionId::new(id).unwrap()
    }

    #[tokio::test]
    async fn free_use_then_quota_exhausted() {
        let ledger = ledger();
        let identity = Identity::Guest(guest("g1"));

        let outcome = ledger
            .record_free_use(&identity, GenerationId::new("s1").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(outcome.entry.unwrap().free_credits_used, 1);

        let status = ledger.evaluate(&RequestIdentity::guest(guest("g1"))).await.unwrap();
        assert!(!status.is_free);
    }

    #[tokio::test]
    async fn paid_generation_does_not_touch_free_usage() {
        let ledger = ledger();
        let identity = Identity::Guest(guest("g1"));

        ledger
            .record_paid_generation(&identity, GenerationId::new("s1").unwrap(), tx("tx_1"))
            .await
            .unwrap();

        let status = ledger.evaluate(&RequestIdentity::guest(guest("g1"))).await.unwrap();
        assert!(status.is_free);
    }

    #[tokio::test]
    async fn regrant_does_not_restore_spent_credit() {
        let ledger = ledger();
        let owner = Identity::Guest(guest("g1"));

        assert!(ledger.grant_paid_credit(tx("tx_1"), owner.clone(), 299).await.unwrap());
        assert!(ledger.consume_paid_credit(&tx("tx_1")).await.unwrap().is_consumed());
        assert!(!ledger.grant_paid_credit(tx("tx_1"), owner, 299).await.unwrap());

        assert_eq!(
            ledger.consume_paid_credit(&tx("tx_1")).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );
    }

    #[tokio::test]
    async fn merged_account_may_spend_guest_credit() {
        let ledger = ledger();
        let account = AccountId::generate();
        let owner = Identity::Guest(guest("g1"));
        ledger.grant_paid_credit(tx("tx_1"), owner.clone(), 299).await.unwrap();
        let credit = ledger.payment_credit(&tx("tx_1")).await.unwrap().unwrap();

        let as_account = RequestIdentity::account(account);
        assert!(!ledger.credit_owned_by(&credit, &as_account).await.unwrap());

        ledger
            .record_free_use(&owner, GenerationId::new("s1").unwrap(), None)
            .await
            .unwrap();
        ledger.merge(&guest("g1"), account, None).await.unwrap();

        assert!(ledger.credit_owned_by(&credit, &as_account).await.unwrap());
        assert!(ledger
            .credit_owned_by(&credit, &RequestIdentity::guest(guest("g1")))
            .await
            .unwrap());
        assert!(!ledger
            .credit_owned_by(&credit, &RequestIdentity::guest(guest("g2")))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn consume_timeout_is_an_error() {
        let store = FlakyStore {
            stall: true,
            ..FlakyStore::default()
        };
        let ledger = Ledger::new(Arc::new(store), Duration::from_millis(50));

        let err = ledger.consume_paid_credit(&tx("tx_1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }
}
