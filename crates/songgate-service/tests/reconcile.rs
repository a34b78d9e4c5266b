//! Consistency reconciler integration tests.

mod common;

use common::{account_key, guest_key, TestHarness, ADMIN_API_KEY};
use serde_json::json;

#[tokio::test]
async fn reconcile_repairs_drift() {
    let harness = TestHarness::new();
    harness
        .complete_for_guest("g1", "song-1")
        .await
        .assert_status_ok();
    assert!(harness.store.set_free_credits_used(&guest_key("g1"), 5).await);

    let response = harness
        .server
        .post("/v1/admin/reconcile")
        .add_header("x-admin-key", ADMIN_API_KEY.to_string())
        .json(&json!({ "guest_id": "g1" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["key"], "guest:g1");
    assert_eq!(body["before"], 5);
    assert_eq!(body["after"], 1);
    assert_eq!(body["corrected"], true);

    let quota: serde_json::Value = harness.guest_quota("g1").await.json();
    assert_eq!(quota["free_credits_used"], 1);
}

#[tokio::test]
async fn reconcile_restores_lost_increment() {
    let harness = TestHarness::new();
    harness
        .complete_for_guest("g1", "song-1")
        .await
        .assert_status_ok();
    // The increment was lost but the generation record survived.
    assert!(harness.store.set_free_credits_used(&guest_key("g1"), 0).await);

    let body: serde_json::Value = harness
        .server
        .post("/v1/admin/reconcile")
        .add_header("x-admin-key", ADMIN_API_KEY.to_string())
        .json(&json!({ "guest_id": "g1" }))
        .await
        .json();

    assert_eq!(body["before"], 0);
    assert_eq!(body["after"], 1);

    let quota: serde_json::Value = harness.guest_quota("g1").await.json();
    assert_eq!(quota["is_free"], false);
}

#[tokio::test]
async fn merged_account_is_consistent() {
    let harness = TestHarness::new();
    harness
        .complete_for_account("song-a")
        .await
        .assert_status_ok();
    harness
        .complete_for_guest("g1", "song-g")
        .await
        .assert_status_ok();
    harness.merge("g1").await.assert_status_ok();

    let body: serde_json::Value = harness
        .server
        .post("/v1/admin/reconcile")
        .add_header("x-admin-key", ADMIN_API_KEY.to_string())
        .json(&json!({ "account_id": harness.account_id.to_string() }))
        .await
        .json();

    assert_eq!(body["key"], account_key(harness.account_id).to_string());
    assert_eq!(body["before"], 2);
    assert_eq!(body["after"], 2);
    assert_eq!(body["corrected"], false);
}

#[tokio::test]
async fn sweep_repairs_every_row() {
    let harness = TestHarness::new();
    for (guest, song) in [("g1", "song-1"), ("g2", "song-2"), ("g3", "song-3")] {
        harness
            .complete_for_guest(guest, song)
            .await
            .assert_status_ok();
    }
    assert!(harness.store.set_free_credits_used(&guest_key("g1"), 3).await);
    assert!(harness.store.set_free_credits_used(&guest_key("g3"), 0).await);

    let response = harness
        .server
        .post("/v1/admin/reconcile/sweep")
        .add_header("x-admin-key", ADMIN_API_KEY.to_string())
        .json(&json!({ "batch_size": 2 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["scanned"], 3);
    assert_eq!(body["corrected"], 2);
    assert_eq!(body["failed"], 0);

    for guest in ["g1", "g2", "g3"] {
        let quota: serde_json::Value = harness.guest_quota(guest).await.json();
        assert_eq!(quota["free_credits_used"], 1);
    }
}

#[tokio::test]
async fn reconcile_requires_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/reconcile")
        .json(&json!({ "guest_id": "g1" }))
        .await
        .assert_status_unauthorized();
    harness
        .server
        .post("/v1/admin/reconcile/sweep")
        .add_header("x-admin-key", "wrong".to_string())
        .json(&json!({}))
        .await
        .assert_status_unauthorized();
}
