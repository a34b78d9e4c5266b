//! In-process store.
//!
//! All tables sit behind one async mutex and every [`Store`] method runs as a
//! single critical section, which gives the same atomicity the database
//! backends get from transactions. Used by tests and local development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use songgate_core::{
    merge, reconcile, AccountId, ConsumeOutcome, GenerationId, GenerationRecord, GuestId,
    Identity, LedgerKey, MergeResult, PaymentCredit, ReconcileReport, RecordOutcome,
    TransactionId, UsageLedgerEntry,
};

use crate::{Result, Store};

/// A stored generation, attributed to the row its owner resolved to.
#[derive(Debug, Clone)]
struct StoredGeneration {
    attributed_to: LedgerKey,
    free: bool,
}

#[derive(Debug, Default)]
struct Tables {
    ledger: BTreeMap<LedgerKey, UsageLedgerEntry>,
    guest_links: HashMap<GuestId, AccountId>,
    credits: HashMap<TransactionId, PaymentCredit>,
    generations: HashMap<GenerationId, StoredGeneration>,
}

impl Tables {
    fn resolve(&self, identity: &Identity) -> LedgerKey {
        match identity {
            Identity::Guest(guest) => self.guest_links.get(guest).map_or_else(
                || identity.ledger_key(),
                |account_id| Identity::Account(*account_id).ledger_key(),
            ),
            Identity::Account(_) => identity.ledger_key(),
        }
    }

    fn free_generations_of(&self, key: &LedgerKey) -> i64 {
        let count = self
            .generations
            .values()
            .filter(|g| g.free && &g.attributed_to == key)
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }
}

/// Store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a row's free usage directly, bypassing the ledger rules.
    ///
    /// Simulates drift left behind by a crashed writer or a manual edit.
    /// Returns `false` if the row does not exist.
    pub async fn set_free_credits_used(&self, key: &LedgerKey, value: i64) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.ledger.get_mut(key) {
            Some(entry) => {
                entry.free_credits_used = value;
                true
            }
            None => false,
        }
    }

    /// Number of ledger rows.
    pub async fn ledger_len(&self) -> usize {
        self.tables.lock().await.ledger.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn entry(&self, key: &LedgerKey) -> Result<Option<UsageLedgerEntry>> {
        Ok(self.tables.lock().await.ledger.get(key).cloned())
    }

    async fn guest_link(&self, guest: &GuestId) -> Result<Option<AccountId>> {
        Ok(self.tables.lock().await.guest_links.get(guest).copied())
    }

    async fn ledger_keys(&self, after: Option<&LedgerKey>, limit: usize) -> Result<Vec<LedgerKey>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .ledger
            .keys()
            .filter(|key| after.map_or(true, |after| *key > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_generation(
        &self,
        record: &GenerationRecord,
        address: Option<&str>,
    ) -> Result<RecordOutcome> {
        let mut tables = self.tables.lock().await;
        let target = tables.resolve(&record.owner);

        if tables.generations.contains_key(&record.generation_id) {
            return Ok(RecordOutcome {
                entry: tables.ledger.get(&target).cloned(),
                target,
                duplicate: true,
            });
        }

        tables.generations.insert(
            record.generation_id.clone(),
            StoredGeneration {
                attributed_to: target.clone(),
                free: record.is_free(),
            },
        );

        if record.is_free() {
            let now = Utc::now();
            let target_identity = target.identity()?;
            let entry = tables
                .ledger
                .entry(target.clone())
                .or_insert_with(|| UsageLedgerEntry::new(&target_identity, now));
            entry.record_free_use(address, now);
        }

        Ok(RecordOutcome {
            entry: tables.ledger.get(&target).cloned(),
            target,
            duplicate: false,
        })
    }

    async fn insert_payment_credit(&self, credit: &PaymentCredit) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.credits.contains_key(&credit.transaction_id) {
            return Ok(false);
        }
        tables
            .credits
            .insert(credit.transaction_id.clone(), credit.clone());
        Ok(true)
    }

    async fn payment_credit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentCredit>> {
        Ok(self.tables.lock().await.credits.get(transaction_id).cloned())
    }

    async fn consume_payment_credit(
        &self,
        transaction_id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let mut tables = self.tables.lock().await;
        let Some(credit) = tables.credits.get_mut(transaction_id) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if !credit.is_available() {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        credit.available_credits -= 1;
        credit.consumed_at = Some(now);
        Ok(ConsumeOutcome::Consumed {
            transaction_id: transaction_id.clone(),
            consumed_at: now,
        })
    }

    async fn merge_guest(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeResult> {
        let mut tables = self.tables.lock().await;
        let guest_key = Identity::Guest(guest.clone()).ledger_key();
        let account_key = Identity::Account(account_id).ledger_key();

        let Some(guest_row) = tables.ledger.remove(&guest_key) else {
            let current = tables
                .ledger
                .get(&account_key)
                .map_or(0, |e| e.free_credits_used);
            return Ok(MergeResult::noop(current));
        };

        let account_row = tables.ledger.remove(&account_key);
        let merged = merge::combine(&guest_row, account_row, account_id, last_known_address, now);
        let combined = merged.free_credits_used;
        tables.ledger.insert(account_key, merged);
        tables.guest_links.insert(guest.clone(), account_id);

        Ok(MergeResult {
            merged: true,
            combined_free_credits_used: combined,
        })
    }

    async fn reconcile(&self, key: &LedgerKey, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut tables = self.tables.lock().await;
        let key = &tables.resolve(&key.identity()?);
        let identity = key.identity()?;

        let mut constituents = vec![key.clone()];
        if let Identity::Account(account_id) = identity {
            constituents.extend(
                tables
                    .guest_links
                    .iter()
                    .filter(|(_, linked)| **linked == account_id)
                    .map(|(guest, _)| Identity::Guest(guest.clone()).ledger_key()),
            );
        }
        let expected = reconcile::expected_free_credits(
            constituents.iter().map(|k| tables.free_generations_of(k)),
        );

        let before = match tables.ledger.get_mut(key) {
            Some(entry) => {
                let before = entry.free_credits_used;
                if before != expected {
                    entry.free_credits_used = expected;
                    entry.updated_at = now;
                }
                before
            }
            None => {
                if expected > 0 {
                    let mut entry = UsageLedgerEntry::new(&identity, now);
                    entry.free_credits_used = expected;
                    tables.ledger.insert(key.clone(), entry);
                }
                0
            }
        };

        Ok(ReconcileReport::new(key.clone(), before, expected))
    }
}
