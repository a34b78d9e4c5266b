//! PostgreSQL store tests.
//!
//! These need a disposable database:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/songgate_test \
//!     cargo test -p songgate-store --test postgres -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use songgate_core::{
    AccountId, ConsumeOutcome, GenerationId, GenerationRecord, GuestId, Identity, PaymentCredit,
    TransactionId,
};
use songgate_store::{PgStore, PgStoreOptions, Store};
use uuid::Uuid;

async fn connect() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
    PgStore::connect(&url, &PgStoreOptions::default())
        .await
        .expect("failed to connect to test database")
}

/// Unique ids per run so tests never see each other's rows.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn free(owner: impl Into<Identity>) -> GenerationRecord {
    GenerationRecord::free(
        GenerationId::new(unique("song")).unwrap(),
        owner.into(),
        Utc::now(),
    )
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_record_increments_and_dedupes() {
    let store = connect().await;
    let guest = GuestId::new(unique("g")).unwrap();
    let record = free(guest.clone());

    let first = store.record_generation(&record, Some("10.0.0.1")).await.unwrap();
    let again = store.record_generation(&record, None).await.unwrap();

    assert_eq!(first.entry.unwrap().free_credits_used, 1);
    assert!(again.duplicate);
    assert_eq!(again.entry.unwrap().free_credits_used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_consume_single_winner() {
    let store = Arc::new(connect().await);
    let tx = TransactionId::new(unique("tx")).unwrap();
    let owner = Identity::Guest(GuestId::new(unique("g")).unwrap());
    store
        .insert_payment_credit(&PaymentCredit::confirmed(tx.clone(), owner, 299, Utc::now()))
        .await
        .unwrap();

    let attempts = (0..10).map(|_| {
        let store = Arc::clone(&store);
        let tx = tx.clone();
        tokio::spawn(async move { store.consume_payment_credit(&tx, Utc::now()).await })
    });
    let outcomes: Vec<ConsumeOutcome> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_consumed()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == ConsumeOutcome::AlreadyConsumed)
            .count(),
        9
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_merge_sums_links_and_reconciles() {
    let store = connect().await;
    let guest = GuestId::new(unique("g")).unwrap();
    let account = AccountId::generate();
    let account_key = Identity::Account(account).ledger_key();

    store.record_generation(&free(guest.clone()), None).await.unwrap();
    store.record_generation(&free(account), None).await.unwrap();

    let result = store
        .merge_guest(&guest, account, Some("10.0.0.9"), Utc::now())
        .await
        .unwrap();
    assert!(result.merged);
    assert_eq!(result.combined_free_credits_used, 2);
    assert_eq!(store.guest_link(&guest).await.unwrap(), Some(account));

    // Drift, then repair.
    sqlx::query("UPDATE usage_ledger SET free_credits_used = 7 WHERE key = $1")
        .bind(account_key.as_str())
        .execute(store.pool())
        .await
        .unwrap();
    let report = store.reconcile(&account_key, Utc::now()).await.unwrap();
    assert_eq!((report.before, report.after), (7, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_merge_races_guest_record() {
    let store = Arc::new(connect().await);
    let guest = GuestId::new(unique("g")).unwrap();
    let account = AccountId::generate();
    store.record_generation(&free(guest.clone()), None).await.unwrap();

    let merge = {
        let store = Arc::clone(&store);
        let guest = guest.clone();
        tokio::spawn(async move { store.merge_guest(&guest, account, None, Utc::now()).await })
    };
    let record = {
        let store = Arc::clone(&store);
        let guest = guest.clone();
        tokio::spawn(async move { store.record_generation(&free(guest), None).await })
    };
    merge.await.unwrap().unwrap();
    record.await.unwrap().unwrap();

    // Whichever ran first, both generations end up on the account row and
    // no guest row survives.
    let guest_row = store
        .entry(&Identity::Guest(guest).ledger_key())
        .await
        .unwrap();
    let account_row = store
        .entry(&Identity::Account(account).ledger_key())
        .await
        .unwrap()
        .unwrap();
    assert!(guest_row.is_none());
    assert_eq!(account_row.free_credits_used, 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_reconcile_stale_guest_key_after_merge() {
    let store = connect().await;
    let guest = GuestId::new(unique("g")).unwrap();
    let account = AccountId::generate();
    let guest_key = Identity::Guest(guest.clone()).ledger_key();
    store.record_generation(&free(guest.clone()), None).await.unwrap();
    store.merge_guest(&guest, account, None, Utc::now()).await.unwrap();

    let report = store.reconcile(&guest_key, Utc::now()).await.unwrap();

    assert_eq!(report.key, Identity::Account(account).ledger_key());
    assert_eq!((report.before, report.after), (1, 1));
    assert!(store.entry(&guest_key).await.unwrap().is_none());
    let again = store.merge_guest(&guest, account, None, Utc::now()).await.unwrap();
    assert!(!again.merged);
    assert_eq!(again.combined_free_credits_used, 1);
}
