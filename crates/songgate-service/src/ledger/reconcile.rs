//! Drift detection and repair against completed generations.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use songgate_core::{Identity, LedgerKey, ReconcileReport, Result, SweepSummary};

use super::Ledger;

impl Ledger {
    /// Reconcile the ledger row that governs `identity`.
    ///
    /// A guest already merged into an account reconciles the account's row.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn reconcile(&self, identity: &Identity) -> Result<ReconcileReport> {
        let key = self
            .call("resolve_key", self.store.resolve_key(identity))
            .await?;
        self.reconcile_key(&key).await
    }

    /// Reconcile one ledger row by key.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn reconcile_key(&self, key: &LedgerKey) -> Result<ReconcileReport> {
        let report = self
            .call("reconcile", self.store.reconcile(key, Utc::now()))
            .await?;

        if report.corrected {
            tracing::warn!(
                key = %report.key,
                before = report.before,
                after = report.after,
                "Ledger drift corrected"
            );
        } else {
            tracing::debug!(key = %report.key, free_credits_used = report.after, "Ledger consistent");
        }

        Ok(report)
    }

    /// Reconcile every ledger row, `batch_size` keys at a time.
    ///
    /// A row whose audit fails is counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if a page of keys cannot be
    /// listed.
    pub async fn sweep(&self, batch_size: usize) -> Result<SweepSummary> {
        let batch_size = batch_size.max(1);
        let mut summary = SweepSummary::default();
        let mut cursor: Option<LedgerKey> = None;

        loop {
            let keys = self
                .call(
                    "ledger_keys",
                    self.store.ledger_keys(cursor.as_ref(), batch_size),
                )
                .await?;

            for key in &keys {
                match self.reconcile_key(key).await {
                    Ok(report) => {
                        summary.scanned += 1;
                        if report.corrected {
                            summary.corrected += 1;
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(key = %key, error = %e, "Reconciliation failed");
                    }
                }
            }

            if keys.len() < batch_size {
                break;
            }
            cursor = keys.into_iter().last();
        }

        tracing::info!(
            scanned = summary.scanned,
            corrected = summary.corrected,
            failed = summary.failed,
            "Reconciliation sweep finished"
        );

        Ok(summary)
    }

    /// Run [`Ledger::sweep`] every `interval` on a background task.
    ///
    /// The first sweep runs one interval after startup.
    #[must_use]
    pub fn spawn_sweeper(self, interval: Duration, batch_size: usize) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(batch_size).await {
                    tracing::error!(error = %e, "Reconciliation sweep aborted");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use songgate_core::{AccountId, GenerationId, GuestId};
    use songgate_store::{MemoryStore, Store};

    use super::*;

    fn guest(id: &str) -> GuestId {
        GuestId::new(id).unwrap()
    }

    async fn record(ledger: &Ledger, identity: impl Into<Identity>, generation: &str) {
        ledger
            .record_free_use(&identity.into(), GenerationId::new(generation).unwrap(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconcile_overwrites_drift() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(1));
        record(&ledger, guest("g1"), "s1").await;
        let key = Identity::Guest(guest("g1")).ledger_key();
        store.set_free_credits_used(&key, 9).await;

        let report = ledger.reconcile(&Identity::Guest(guest("g1"))).await.unwrap();

        assert!(report.corrected);
        assert_eq!((report.before, report.after), (9, 1));
    }

    #[tokio::test]
    async fn merged_guest_reconciles_account_row() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(1));
        let account = AccountId::generate();
        record(&ledger, guest("g1"), "s1").await;
        ledger.merge(&guest("g1"), account, None).await.unwrap();

        let report = ledger.reconcile(&Identity::Guest(guest("g1"))).await.unwrap();

        assert_eq!(report.key, Identity::Account(account).ledger_key());
        assert!(!report.corrected);
        assert_eq!(report.after, 1);
    }

    #[tokio::test]
    async fn sweep_visits_every_row() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(1));
        for i in 0..5 {
            record(&ledger, guest(&format!("g{i}")), &format!("s{i}")).await;
        }
        let drifted = Identity::Guest(guest("g3")).ledger_key();
        store.set_free_credits_used(&drifted, 0).await;

        let summary = ledger.sweep(2).await.unwrap();

        assert_eq!(summary.scanned, 5);
        assert_eq!(summary.corrected, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.entry(&drifted).await.unwrap().unwrap().free_credits_used, 1);
    }

    #[tokio::test]
    async fn stale_guest_key_after_merge_reconciles_account() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), Duration::from_secs(1));
        let account = AccountId::generate();
        record(&ledger, guest("g1"), "s1").await;
        let stale = store.resolve_key(&guest("g1").into()).await.unwrap();
        ledger.merge(&guest("g1"), account, None).await.unwrap();

        let report = ledger.reconcile_key(&stale).await.unwrap();

        assert_eq!(report.key, Identity::Account(account).ledger_key());
        assert!(!report.corrected);
        assert!(store.entry(&stale).await.unwrap().is_none());
        assert_eq!(store.ledger_len().await, 1);

        let again = ledger.merge(&guest("g1"), account, None).await.unwrap();
        assert!(!again.merged);
        assert_eq!(again.combined_free_credits_used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_racing_merges_never_revives_guest_rows() {
        for round in 0..20 {
            let store = Arc::new(MemoryStore::new());
            let ledger = Ledger::new(store.clone(), Duration::from_secs(1));
            let account = AccountId::generate();
            let guests: Vec<GuestId> = (0..4).map(|i| guest(&format!("g{round}-{i}"))).collect();
            for (i, g) in guests.iter().enumerate() {
                record(&ledger, g.clone(), &format!("s{round}-{i}")).await;
            }

            let sweep = {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.sweep(1).await })
            };
            let merges = guests.iter().cloned().map(|g| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.merge(&g, account, None).await })
            });
            for merge in futures::future::join_all(merges).await {
                merge.unwrap().unwrap();
            }
            sweep.await.unwrap().unwrap();

            for g in &guests {
                assert!(store
                    .entry(&Identity::Guest(g.clone()).ledger_key())
                    .await
                    .unwrap()
                    .is_none());
            }
            assert_eq!(store.ledger_len().await, 1);
            let account_row = store
                .entry(&Identity::Account(account).ledger_key())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(account_row.free_credits_used, 4);
        }
    }
}
