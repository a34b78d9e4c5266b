//! `RocksDB` storage implementation.
//!
//! Uses a pessimistic `TransactionDB`: every multi-key operation reads the
//! keys it depends on with `get_for_update`, so a concurrent writer on the
//! same key blocks (or times out) instead of interleaving. Lock order is
//! guest ledger key before anything else. Calls run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, TransactionDB, TransactionDBOptions,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use songgate_core::{
    merge, reconcile, AccountId, ConsumeOutcome, Funding, GenerationRecord, GuestId, Identity,
    LedgerKey, MergeResult, PaymentCredit, ReconcileReport, RecordOutcome, TransactionId,
    UsageLedgerEntry,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Self::Conflict(err.to_string())
            }
            ErrorKind::IOError | ErrorKind::ShutdownInProgress => {
                Self::Unavailable(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Value stored in the generations column family.
#[derive(Debug, Serialize, Deserialize)]
struct StoredGeneration {
    attributed_to: LedgerKey,
    funding: Funding,
    completed_at: DateTime<Utc>,
}

/// RocksDB-backed storage implementation.
#[derive(Clone)]
pub struct RocksStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: TransactionDB<MultiThreaded>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            cf_descriptors,
        )?;

        Ok(Self {
            inner: Arc::new(Inner { db }),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}

/// Serialize a value using CBOR.
fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_account(data: &[u8]) -> Result<AccountId> {
    Uuid::from_slice(data)
        .map(AccountId::from_uuid)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Keys from a forward iterator until the first one outside `prefix`.
fn keys_with_prefix<I>(iter: I, prefix: &[u8]) -> Result<Vec<Box<[u8]>>>
where
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut found = Vec::new();
    for item in iter {
        let (key, _) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        found.push(key);
    }
    Ok(found)
}

impl Inner {
    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn entry(&self, key: &LedgerKey) -> Result<Option<UsageLedgerEntry>> {
        let ledger = self.cf(cf::USAGE_LEDGER)?;
        self.db
            .get_cf(&ledger, keys::ledger_key(key))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn guest_link(&self, guest: &GuestId) -> Result<Option<AccountId>> {
        let links = self.cf(cf::GUEST_LINKS)?;
        self.db
            .get_cf(&links, keys::guest_link_key(guest))?
            .map(|data| decode_account(&data))
            .transpose()
    }

    fn ledger_keys(&self, after: Option<&LedgerKey>, limit: usize) -> Result<Vec<LedgerKey>> {
        let ledger = self.cf(cf::USAGE_LEDGER)?;
        let start = after.map(keys::ledger_key);
        let mode = match &start {
            Some(raw) => IteratorMode::From(raw, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut found = Vec::new();
        for item in self.db.iterator_cf(&ledger, mode) {
            if found.len() >= limit {
                break;
            }
            let (raw, _) = item?;
            if start.as_deref() == Some(&*raw) {
                continue;
            }
            let text =
                std::str::from_utf8(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
            found.push(text.parse()?);
        }
        Ok(found)
    }

    fn record_generation(
        &self,
        record: &GenerationRecord,
        address: Option<&str>,
    ) -> Result<RecordOutcome> {
        let ledger = self.cf(cf::USAGE_LEDGER)?;
        let links = self.cf(cf::GUEST_LINKS)?;
        let generations = self.cf(cf::GENERATIONS)?;
        let by_owner = self.cf(cf::FREE_GENERATIONS_BY_OWNER)?;
        let txn = self.db.transaction();

        let owner_key = record.owner.ledger_key();
        txn.get_for_update_cf(&ledger, keys::ledger_key(&owner_key), true)?;
        let target = match &record.owner {
            Identity::Guest(guest) => {
                match txn.get_for_update_cf(&links, keys::guest_link_key(guest), true)? {
                    Some(data) => Identity::Account(decode_account(&data)?).ledger_key(),
                    None => owner_key,
                }
            }
            Identity::Account(_) => owner_key,
        };
        let target_raw = keys::ledger_key(&target);
        let current: Option<UsageLedgerEntry> = txn
            .get_for_update_cf(&ledger, &target_raw, true)?
            .map(|data| deserialize(&data))
            .transpose()?;

        let generation_raw = keys::generation_key(&record.generation_id);
        if txn
            .get_for_update_cf(&generations, &generation_raw, true)?
            .is_some()
        {
            return Ok(RecordOutcome {
                entry: current,
                target,
                duplicate: true,
            });
        }

        let stored = StoredGeneration {
            attributed_to: target.clone(),
            funding: record.funding.clone(),
            completed_at: record.completed_at,
        };
        txn.put_cf(&generations, generation_raw, serialize(&stored)?)?;

        let entry = if record.is_free() {
            let now = Utc::now();
            let mut entry = match current {
                Some(entry) => entry,
                None => UsageLedgerEntry::new(&target.identity()?, now),
            };
            entry.record_free_use(address, now);
            txn.put_cf(&ledger, &target_raw, serialize(&entry)?)?;
            txn.put_cf(
                &by_owner,
                keys::owner_generation_key(&target, &record.generation_id),
                b"",
            )?;
            Some(entry)
        } else {
            current
        };

        txn.commit()?;
        Ok(RecordOutcome {
            entry,
            target,
            duplicate: false,
        })
    }

    fn insert_payment_credit(&self, credit: &PaymentCredit) -> Result<bool> {
        let credits = self.cf(cf::PAYMENT_CREDITS)?;
        let key = keys::credit_key(&credit.transaction_id);
        let txn = self.db.transaction();

        if txn.get_for_update_cf(&credits, &key, true)?.is_some() {
            return Ok(false);
        }
        txn.put_cf(&credits, key, serialize(credit)?)?;
        txn.commit()?;
        Ok(true)
    }

    fn payment_credit(&self, transaction_id: &TransactionId) -> Result<Option<PaymentCredit>> {
        let credits = self.cf(cf::PAYMENT_CREDITS)?;
        self.db
            .get_cf(&credits, keys::credit_key(transaction_id))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn consume_payment_credit(
        &self,
        transaction_id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let credits = self.cf(cf::PAYMENT_CREDITS)?;
        let key = keys::credit_key(transaction_id);
        let txn = self.db.transaction();

        let Some(data) = txn.get_for_update_cf(&credits, &key, true)? else {
            return Ok(ConsumeOutcome::NotFound);
        };
        let mut credit: PaymentCredit = deserialize(&data)?;
        if !credit.is_available() {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }

        credit.available_credits -= 1;
        credit.consumed_at = Some(now);
        txn.put_cf(&credits, key, serialize(&credit)?)?;
        txn.commit()?;

        Ok(ConsumeOutcome::Consumed {
            transaction_id: transaction_id.clone(),
            consumed_at: now,
        })
    }

    fn merge_guest(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeResult> {
        let ledger = self.cf(cf::USAGE_LEDGER)?;
        let links = self.cf(cf::GUEST_LINKS)?;
        let by_account = self.cf(cf::GUEST_LINKS_BY_ACCOUNT)?;
        let txn = self.db.transaction();

        let guest_raw = keys::ledger_key(&Identity::Guest(guest.clone()).ledger_key());
        let account_raw = keys::ledger_key(&Identity::Account(account_id).ledger_key());

        let guest_row: Option<UsageLedgerEntry> = txn
            .get_for_update_cf(&ledger, &guest_raw, true)?
            .map(|data| deserialize(&data))
            .transpose()?;
        let account_row: Option<UsageLedgerEntry> = txn
            .get_for_update_cf(&ledger, &account_raw, true)?
            .map(|data| deserialize(&data))
            .transpose()?;

        let Some(guest_row) = guest_row else {
            return Ok(MergeResult::noop(
                account_row.map_or(0, |e| e.free_credits_used),
            ));
        };

        let link_raw = keys::guest_link_key(guest);
        let previous = txn
            .get_for_update_cf(&links, &link_raw, true)?
            .map(|data| decode_account(&data))
            .transpose()?;

        let merged = merge::combine(&guest_row, account_row, account_id, last_known_address, now);

        txn.delete_cf(&ledger, &guest_raw)?;
        txn.put_cf(&ledger, &account_raw, serialize(&merged)?)?;
        if let Some(previous) = previous.filter(|p| *p != account_id) {
            txn.delete_cf(&by_account, keys::account_guest_key(&previous, guest))?;
        }
        txn.put_cf(&links, &link_raw, account_id.as_uuid().as_bytes())?;
        txn.put_cf(&by_account, keys::account_guest_key(&account_id, guest), b"")?;
        txn.commit()?;

        Ok(MergeResult {
            merged: true,
            combined_free_credits_used: merged.free_credits_used,
        })
    }

    fn reconcile(&self, key: &LedgerKey, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let ledger = self.cf(cf::USAGE_LEDGER)?;
        let links = self.cf(cf::GUEST_LINKS)?;
        let by_account = self.cf(cf::GUEST_LINKS_BY_ACCOUNT)?;
        let by_owner = self.cf(cf::FREE_GENERATIONS_BY_OWNER)?;
        let txn = self.db.transaction();

        // Same lock order as merge: guest row, then link, then account row.
        txn.get_for_update_cf(&ledger, keys::ledger_key(key), true)?;
        let key = &match key.identity()? {
            Identity::Guest(guest) => {
                match txn.get_for_update_cf(&links, keys::guest_link_key(&guest), true)? {
                    Some(data) => Identity::Account(decode_account(&data)?).ledger_key(),
                    None => key.clone(),
                }
            }
            Identity::Account(_) => key.clone(),
        };
        let identity = key.identity()?;
        let raw = keys::ledger_key(key);

        let stored: Option<UsageLedgerEntry> = txn
            .get_for_update_cf(&ledger, &raw, true)?
            .map(|data| deserialize(&data))
            .transpose()?;

        let mut constituents = vec![key.clone()];
        if let Identity::Account(account_id) = &identity {
            let prefix = keys::account_guests_prefix(account_id);
            let iter = txn.iterator_cf(&by_account, IteratorMode::From(&prefix, Direction::Forward));
            for index_key in keys_with_prefix(iter, &prefix)? {
                let guest = keys::extract_guest_from_account_key(&index_key).ok_or_else(|| {
                    StoreError::Serialization("malformed guest link index key".to_string())
                })?;
                constituents.push(Identity::Guest(guest).ledger_key());
            }
        }

        let mut counts = Vec::with_capacity(constituents.len());
        for constituent in &constituents {
            let prefix = keys::owner_generations_prefix(constituent);
            let iter = txn.iterator_cf(&by_owner, IteratorMode::From(&prefix, Direction::Forward));
            let found = keys_with_prefix(iter, &prefix)?.len();
            counts.push(i64::try_from(found).unwrap_or(i64::MAX));
        }
        let expected = reconcile::expected_free_credits(counts);

        let before = stored.as_ref().map_or(0, |e| e.free_credits_used);
        let rewrite = match stored {
            Some(mut entry) if entry.free_credits_used != expected => {
                entry.free_credits_used = expected;
                entry.updated_at = now;
                Some(entry)
            }
            None if expected > 0 => {
                let mut entry = UsageLedgerEntry::new(&identity, now);
                entry.free_credits_used = expected;
                Some(entry)
            }
            _ => None,
        };
        if let Some(entry) = rewrite {
            txn.put_cf(&ledger, &raw, serialize(&entry)?)?;
            txn.commit()?;
        }

        Ok(ReconcileReport::new(key.clone(), before, expected))
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn ping(&self) -> Result<()> {
        self.run(|inner| inner.cf(cf::USAGE_LEDGER).map(|_| ())).await
    }

    async fn entry(&self, key: &LedgerKey) -> Result<Option<UsageLedgerEntry>> {
        let key = key.clone();
        self.run(move |inner| inner.entry(&key)).await
    }

    async fn guest_link(&self, guest: &GuestId) -> Result<Option<AccountId>> {
        let guest = guest.clone();
        self.run(move |inner| inner.guest_link(&guest)).await
    }

    async fn ledger_keys(&self, after: Option<&LedgerKey>, limit: usize) -> Result<Vec<LedgerKey>> {
        let after = after.cloned();
        self.run(move |inner| inner.ledger_keys(after.as_ref(), limit))
            .await
    }

    async fn record_generation(
        &self,
        record: &GenerationRecord,
        address: Option<&str>,
    ) -> Result<RecordOutcome> {
        let record = record.clone();
        let address = address.map(str::to_string);
        self.run(move |inner| inner.record_generation(&record, address.as_deref()))
            .await
    }

    async fn insert_payment_credit(&self, credit: &PaymentCredit) -> Result<bool> {
        let credit = credit.clone();
        self.run(move |inner| inner.insert_payment_credit(&credit))
            .await
    }

    async fn payment_credit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentCredit>> {
        let transaction_id = transaction_id.clone();
        self.run(move |inner| inner.payment_credit(&transaction_id))
            .await
    }

    async fn consume_payment_credit(
        &self,
        transaction_id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let transaction_id = transaction_id.clone();
        self.run(move |inner| inner.consume_payment_credit(&transaction_id, now))
            .await
    }

    async fn merge_guest(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeResult> {
        let guest = guest.clone();
        let address = last_known_address.map(str::to_string);
        self.run(move |inner| inner.merge_guest(&guest, account_id, address.as_deref(), now))
            .await
    }

    async fn reconcile(&self, key: &LedgerKey, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let key = key.clone();
        self.run(move |inner| inner.reconcile(&key, now)).await
    }
}
