//! Client tests against a mock songgate service.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use songgate_client::{Caller, ClientError, Decision, GenerationCompleted, SonggateClient};
use songgate_core::{GenerationId, GuestId, TransactionId};

async fn client(server: &MockServer) -> SonggateClient {
    SonggateClient::new(server.uri(), "test-key").unwrap()
}

fn guest() -> GuestId {
    GuestId::new("g1").unwrap()
}

#[tokio::test]
async fn quota_forwards_guest_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quota"))
        .and(header("x-guest-id", "g1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "is_free": true, "free_credits_used": 0 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let quota = client(&server)
        .await
        .quota(&Caller::guest(guest()))
        .await
        .unwrap();

    assert!(quota.is_free);
    assert_eq!(quota.free_credits_used, 0);
}

#[tokio::test]
async fn authorize_maps_payment_required() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generations/authorize"))
        .and(header("authorization", "Bearer jwt-token"))
        .and(body_json(json!({ "transaction_id": "cs_test_1" })))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "code": "payment_required",
                "message": "A purchased credit is required for this generation",
                "details": {
                    "reason": "credit_already_consumed",
                    "free_credits_used": 1,
                    "transaction_id": "cs_test_1"
                }
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .authorize(
            &Caller::account("jwt-token"),
            Some(TransactionId::new("cs_test_1").unwrap()),
        )
        .await
        .unwrap_err();

    match err {
        ClientError::PaymentRequired {
            reason,
            free_credits_used,
            transaction_id,
        } => {
            assert_eq!(reason, "credit_already_consumed");
            assert_eq!(free_credits_used, 1);
            assert_eq!(transaction_id.as_deref(), Some("cs_test_1"));
        }
        other => panic!("expected PaymentRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn authorize_free() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generations/authorize"))
        .and(body_json(json!({})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "decision": "free", "free_credits_used": 0 })),
        )
        .mount(&server)
        .await;

    let auth = client(&server)
        .await
        .authorize(&Caller::guest(guest()), None)
        .await
        .unwrap();

    assert_eq!(auth.decision, Decision::Free);
    assert!(auth.transaction_id.is_none());
}

#[tokio::test]
async fn completed_uses_service_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generations/completed"))
        .and(header("x-api-key", "test-key"))
        .and(body_json(json!({ "generation_id": "song-1", "guest_id": "g1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "recorded": true,
            "duplicate": false,
            "key": "guest:g1",
            "free_credits_used": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .await
        .generation_completed(&GenerationCompleted {
            generation_id: GenerationId::new("song-1").unwrap(),
            guest_id: Some(guest()),
            account_id: None,
            transaction_id: None,
            last_known_address: None,
        })
        .await
        .unwrap();

    assert!(response.recorded);
    assert_eq!(response.free_credits_used, 1);
}

#[tokio::test]
async fn unavailable_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/cs_test_1/consume"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("retry-after", "1")
                .set_body_json(json!({
                    "error": {
                        "code": "store_unavailable",
                        "message": "Temporarily unavailable, please retry"
                    }
                })),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .consume_credit(&TransactionId::new("cs_test_1").unwrap())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(
        err,
        ClientError::Unavailable {
            retry_after_seconds: Some(1),
            ..
        }
    ));
}

#[tokio::test]
async fn missing_credit_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/cs_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "not_found", "message": "credit cs_missing" }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .credit(&TransactionId::new("cs_missing").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::CreditNotFound { transaction_id } if transaction_id == "cs_missing"
    ));
}

#[tokio::test]
async fn merge_reports_deferral() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/identity/merge"))
        .and(header("authorization", "Bearer jwt-token"))
        .and(body_json(json!({ "guest_id": "g1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "merged": false,
            "combined_free_credits_used": null,
            "deferred": true
        })))
        .mount(&server)
        .await;

    let merged = client(&server)
        .await
        .merge("jwt-token", guest(), None)
        .await
        .unwrap();

    assert!(!merged.merged);
    assert!(merged.deferred);
}

#[tokio::test]
async fn unparseable_error_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server).await.health().await.unwrap_err();

    assert!(matches!(err, ClientError::Api { status: 500, .. }));
    assert!(!err.is_retryable());
}
