//! PostgreSQL store.
//!
//! Cross-row operations (record, merge, reconcile) run in one transaction and
//! take transaction-scoped advisory locks on the ledger keys they touch,
//! always guest before account. That serializes a merge against a concurrent
//! record for the same guest without locking rows that may not exist yet.
//! Credit consumption is a single conditional `UPDATE`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use uuid::Uuid;

use songgate_core::{
    merge, reconcile, AccountId, ConsumeOutcome, GenerationRecord, GuestId, Identity, LedgerKey,
    MergeResult, PaymentCredit, ReconcileReport, RecordOutcome, TransactionId, UsageLedgerEntry,
};

use crate::error::{Result, StoreError};
use crate::Store;

// =============================================================================
// Error Mapping
// =============================================================================

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    return Self::UniqueViolation {
                        constraint: db.constraint().unwrap_or("unknown").to_string(),
                    };
                }
                match db.code().as_deref() {
                    // serialization_failure, deadlock_detected, lock_not_available
                    Some("40001" | "40P01" | "55P03") => Self::Conflict(db.message().to_string()),
                    Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                        Self::Unavailable(db.message().to_string())
                    }
                    _ => Self::Database(db.message().to_string()),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_) => Self::Serialization(err.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {err}"))
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    key: String,
    account_id: Option<Uuid>,
    free_credits_used: i64,
    last_known_address: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for UsageLedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(Self {
            key: row.key.parse()?,
            account_id: row.account_id.map(AccountId::from_uuid),
            free_credits_used: row.free_credits_used,
            last_known_address: row.last_known_address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CreditRow {
    transaction_id: String,
    available_credits: i64,
    consumed_at: Option<DateTime<Utc>>,
    owner_identity: String,
    amount_cents: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<CreditRow> for PaymentCredit {
    type Error = StoreError;

    fn try_from(row: CreditRow) -> Result<Self> {
        Ok(Self {
            transaction_id: TransactionId::new(row.transaction_id)?,
            available_credits: row.available_credits,
            consumed_at: row.consumed_at,
            owner: row.owner_identity.parse()?,
            amount_cents: row.amount_cents,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// PgStore
// =============================================================================

/// Connection settings for [`PgStore::connect`].
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a pooled connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or a migration fails.
    pub async fn connect(database_url: &str, options: &PgStoreOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(database_url)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Migrations are not run.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================

async fn lock_key(conn: &mut PgConnection, key: &LedgerKey) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn resolve_in(conn: &mut PgConnection, identity: &Identity) -> Result<LedgerKey> {
    match identity {
        Identity::Account(_) => Ok(identity.ledger_key()),
        Identity::Guest(guest) => {
            let linked: Option<Uuid> =
                sqlx::query_scalar("SELECT account_id FROM guest_links WHERE guest_id = $1")
                    .bind(guest.as_str())
                    .fetch_optional(&mut *conn)
                    .await?;
            Ok(linked.map_or_else(
                || identity.ledger_key(),
                |id| Identity::Account(AccountId::from_uuid(id)).ledger_key(),
            ))
        }
    }
}

async fn fetch_entry(
    conn: &mut PgConnection,
    key: &LedgerKey,
    for_update: bool,
) -> Result<Option<UsageLedgerEntry>> {
    let sql = if for_update {
        "SELECT key, account_id, free_credits_used, last_known_address, created_at, updated_at \
         FROM usage_ledger WHERE key = $1 FOR UPDATE"
    } else {
        "SELECT key, account_id, free_credits_used, last_known_address, created_at, updated_at \
         FROM usage_ledger WHERE key = $1"
    };
    sqlx::query_as::<_, LedgerRow>(sql)
        .bind(key.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .map(UsageLedgerEntry::try_from)
        .transpose()
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn entry(&self, key: &LedgerKey) -> Result<Option<UsageLedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entry(&mut conn, key, false).await
    }

    async fn guest_link(&self, guest: &GuestId) -> Result<Option<AccountId>> {
        let linked: Option<Uuid> =
            sqlx::query_scalar("SELECT account_id FROM guest_links WHERE guest_id = $1")
                .bind(guest.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(linked.map(AccountId::from_uuid))
    }

    async fn ledger_keys(&self, after: Option<&LedgerKey>, limit: usize) -> Result<Vec<LedgerKey>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM usage_ledger WHERE ($1::text IS NULL OR key > $1) ORDER BY key LIMIT $2",
        )
        .bind(after.map(LedgerKey::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        keys.iter()
            .map(|key| key.parse().map_err(StoreError::from))
            .collect()
    }

    async fn record_generation(
        &self,
        record: &GenerationRecord,
        address: Option<&str>,
    ) -> Result<RecordOutcome> {
        let mut tx = self.pool.begin().await?;

        let owner_key = record.owner.ledger_key();
        lock_key(&mut tx, &owner_key).await?;
        let target = resolve_in(&mut tx, &record.owner).await?;
        if target != owner_key {
            lock_key(&mut tx, &target).await?;
        }

        let inserted = sqlx::query(
            "INSERT INTO generations (generation_id, owner_identity, transaction_id, completed_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (generation_id) DO NOTHING",
        )
        .bind(record.generation_id.as_str())
        .bind(target.as_str())
        .bind(record.transaction_id().map(TransactionId::as_str))
        .bind(record.completed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let entry = if inserted && record.is_free() {
            let account_id = target.identity()?.account_id();
            let row = sqlx::query_as::<_, LedgerRow>(
                "INSERT INTO usage_ledger (key, account_id, free_credits_used, last_known_address) \
                 VALUES ($1, $2, 1, $3) \
                 ON CONFLICT (key) DO UPDATE SET \
                     free_credits_used = usage_ledger.free_credits_used + 1, \
                     last_known_address = COALESCE(EXCLUDED.last_known_address, usage_ledger.last_known_address), \
                     updated_at = now() \
                 RETURNING key, account_id, free_credits_used, last_known_address, created_at, updated_at",
            )
            .bind(target.as_str())
            .bind(account_id.map(|id| *id.as_uuid()))
            .bind(address)
            .fetch_one(&mut *tx)
            .await?;
            Some(UsageLedgerEntry::try_from(row)?)
        } else {
            fetch_entry(&mut tx, &target, false).await?
        };

        tx.commit().await?;

        Ok(RecordOutcome {
            entry,
            target,
            duplicate: !inserted,
        })
    }

    async fn insert_payment_credit(&self, credit: &PaymentCredit) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO payment_credits \
                 (transaction_id, available_credits, consumed_at, owner_identity, amount_cents, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(credit.transaction_id.as_str())
        .bind(credit.available_credits)
        .bind(credit.consumed_at)
        .bind(credit.owner.to_string())
        .bind(credit.amount_cents)
        .bind(credit.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn payment_credit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentCredit>> {
        sqlx::query_as::<_, CreditRow>(
            "SELECT transaction_id, available_credits, consumed_at, owner_identity, amount_cents, created_at \
             FROM payment_credits WHERE transaction_id = $1",
        )
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(PaymentCredit::try_from)
        .transpose()
    }

    async fn consume_payment_credit(
        &self,
        transaction_id: &TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let consumed: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "UPDATE payment_credits \
             SET available_credits = available_credits - 1, consumed_at = $2 \
             WHERE transaction_id = $1 AND available_credits > 0 \
             RETURNING consumed_at",
        )
        .bind(transaction_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(consumed_at) = consumed {
            return Ok(ConsumeOutcome::Consumed {
                transaction_id: transaction_id.clone(),
                consumed_at: consumed_at.unwrap_or(now),
            });
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM payment_credits WHERE transaction_id = $1)",
        )
        .bind(transaction_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            ConsumeOutcome::AlreadyConsumed
        } else {
            ConsumeOutcome::NotFound
        })
    }

    async fn merge_guest(
        &self,
        guest: &GuestId,
        account_id: AccountId,
        last_known_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeResult> {
        let guest_key = Identity::Guest(guest.clone()).ledger_key();
        let account_key = Identity::Account(account_id).ledger_key();

        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, &guest_key).await?;
        lock_key(&mut tx, &account_key).await?;

        let Some(guest_row) = fetch_entry(&mut tx, &guest_key, true).await? else {
            let current = fetch_entry(&mut tx, &account_key, false)
                .await?
                .map_or(0, |e| e.free_credits_used);
            tx.rollback().await?;
            return Ok(MergeResult::noop(current));
        };
        let account_row = fetch_entry(&mut tx, &account_key, true).await?;
        let merged = merge::combine(&guest_row, account_row, account_id, last_known_address, now);

        // The guest row goes first so the account upsert never sees two rows
        // carrying the same account id.
        sqlx::query("DELETE FROM usage_ledger WHERE key = $1")
            .bind(guest_key.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO usage_ledger \
                 (key, account_id, free_credits_used, last_known_address, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (key) DO UPDATE SET \
                 account_id = EXCLUDED.account_id, \
                 free_credits_used = EXCLUDED.free_credits_used, \
                 last_known_address = EXCLUDED.last_known_address, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(merged.key.as_str())
        .bind(*account_id.as_uuid())
        .bind(merged.free_credits_used)
        .bind(merged.last_known_address.as_deref())
        .bind(merged.created_at)
        .bind(merged.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO guest_links (guest_id, account_id, merged_at) VALUES ($1, $2, $3) \
             ON CONFLICT (guest_id) DO UPDATE SET account_id = EXCLUDED.account_id, merged_at = EXCLUDED.merged_at",
        )
        .bind(guest.as_str())
        .bind(*account_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MergeResult {
            merged: true,
            combined_free_credits_used: merged.free_credits_used,
        })
    }

    async fn reconcile(&self, key: &LedgerKey, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut tx = self.pool.begin().await?;
        lock_key(&mut tx, key).await?;

        // A guest merged since the caller resolved it audits the account row.
        let resolved = resolve_in(&mut tx, &key.identity()?).await?;
        if resolved != *key {
            lock_key(&mut tx, &resolved).await?;
        }
        let key = &resolved;
        let identity = key.identity()?;
        let stored = fetch_entry(&mut tx, key, true).await?;

        let mut constituents = vec![key.as_str().to_string()];
        if let Identity::Account(account_id) = &identity {
            let guests: Vec<String> =
                sqlx::query_scalar("SELECT guest_id FROM guest_links WHERE account_id = $1")
                    .bind(*account_id.as_uuid())
                    .fetch_all(&mut *tx)
                    .await?;
            for guest in guests {
                constituents.push(Identity::Guest(GuestId::new(guest)?).to_string());
            }
        }

        let counts: Vec<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM generations \
             WHERE transaction_id IS NULL AND owner_identity = ANY($1) \
             GROUP BY owner_identity",
        )
        .bind(&constituents)
        .fetch_all(&mut *tx)
        .await?;
        let expected = reconcile::expected_free_credits(counts);

        let before = stored.as_ref().map_or(0, |e| e.free_credits_used);
        if stored.is_some() && before != expected {
            sqlx::query("UPDATE usage_ledger SET free_credits_used = $2, updated_at = $3 WHERE key = $1")
                .bind(key.as_str())
                .bind(expected)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        } else if stored.is_none() && expected > 0 {
            sqlx::query(
                "INSERT INTO usage_ledger (key, account_id, free_credits_used, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $4)",
            )
            .bind(key.as_str())
            .bind(identity.account_id().map(|id| *id.as_uuid()))
            .bind(expected)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ReconcileReport::new(key.clone(), before, expected))
    }
}
