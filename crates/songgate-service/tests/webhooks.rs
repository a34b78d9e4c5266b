//! Stripe webhook integration tests.

mod common;

use chrono::Utc;
use common::{checkout_payload, TestHarness, SERVICE_API_KEY, WEBHOOK_SECRET};
use serde_json::json;

use songgate_service::stripe::sign_webhook_payload;

async fn available_credits(harness: &TestHarness, tx: &str) -> Option<i64> {
    let response = harness
        .server
        .get(&format!("/v1/credits/{tx}"))
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .await;
    if response.status_code().is_success() {
        let body: serde_json::Value = response.json();
        body["available_credits"].as_i64()
    } else {
        None
    }
}

#[tokio::test]
async fn paid_checkout_grants_credit() {
    let harness = TestHarness::new();

    let response = harness
        .stripe_checkout("cs_test_1", "paid", json!({ "guest_id": "g1" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(available_credits(&harness, "cs_test_1").await, Some(1));
}

#[tokio::test]
async fn redelivery_does_not_restore_spent_credit() {
    let harness = TestHarness::new();
    harness
        .stripe_checkout("cs_test_1", "paid", json!({ "guest_id": "g1" }))
        .await
        .assert_status_ok();
    harness
        .server
        .post("/v1/credits/cs_test_1/consume")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .await
        .assert_status_ok();

    harness
        .stripe_checkout("cs_test_1", "paid", json!({ "guest_id": "g1" }))
        .await
        .assert_status_ok();

    assert_eq!(available_credits(&harness, "cs_test_1").await, Some(0));
}

#[tokio::test]
async fn unpaid_checkout_is_ignored() {
    let harness = TestHarness::new();

    harness
        .stripe_checkout("cs_test_1", "unpaid", json!({ "guest_id": "g1" }))
        .await
        .assert_status_ok();

    assert_eq!(available_credits(&harness, "cs_test_1").await, None);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let payload = checkout_payload("cs_test_1", "paid", json!({ "guest_id": "g1" }));
    let signature = sign_webhook_payload(&payload, "whsec_wrong", Utc::now().timestamp());

    let response = harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", signature)
        .text(payload)
        .await;

    response.assert_status_bad_request();
    assert_eq!(available_credits(&harness, "cs_test_1").await, None);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let harness = TestHarness::new();
    let payload = checkout_payload("cs_test_1", "paid", json!({ "guest_id": "g1" }));

    let response = harness.server.post("/webhooks/stripe").text(payload).await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn stale_signature_is_rejected() {
    let harness = TestHarness::new();
    let payload = checkout_payload("cs_test_1", "paid", json!({ "guest_id": "g1" }));
    let signature =
        sign_webhook_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp() - 3600);

    let response = harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", signature)
        .text(payload)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn checkout_without_owner_is_acknowledged_without_credit() {
    let harness = TestHarness::new();

    let response = harness.stripe_checkout("cs_test_1", "paid", json!({})).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(available_credits(&harness, "cs_test_1").await, None);

    let response = harness
        .stripe_checkout("cs_test_2", "paid", json!({ "account_id": "not-a-uuid" }))
        .await;
    response.assert_status_ok();
    assert_eq!(available_credits(&harness, "cs_test_2").await, None);
}
