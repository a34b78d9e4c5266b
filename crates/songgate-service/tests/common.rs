//! Common test utilities for songgate integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::Utc;
use serde_json::{json, Value};

use songgate_core::{AccountId, GuestId, Identity, LedgerKey};
use songgate_service::stripe::sign_webhook_payload;
use songgate_service::{create_router, AppState, Ledger, ServiceConfig};
use songgate_store::MemoryStore;

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for simulating drift.
    pub store: Arc<MemoryStore>,
    /// The engine behind the server, for direct setup.
    pub ledger: Ledger,
    /// A test account ID for authenticated requests.
    pub account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with an empty in-memory store.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_base_url: "http://localhost".into(),
            auth_audience: "songgate".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };

        let state = AppState::new(store.clone(), config);
        let ledger = state.ledger.clone();
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            ledger,
            account_id: AccountId::generate(),
        }
    }

    /// Authorization header for the harness account.
    pub fn account_auth_header(&self) -> String {
        account_auth_header(self.account_id)
    }

    /// Quota as seen by a guest.
    pub async fn guest_quota(&self, guest: &str) -> TestResponse {
        self.server
            .get("/v1/quota")
            .add_header("x-guest-id", guest.to_string())
            .await
    }

    /// Quota as seen by the harness account.
    pub async fn account_quota(&self) -> TestResponse {
        self.server
            .get("/v1/quota")
            .add_header("authorization", self.account_auth_header())
            .await
    }

    /// Send a generation-completed event from the pipeline.
    pub async fn complete(&self, body: Value) -> TestResponse {
        self.server
            .post("/v1/generations/completed")
            .add_header("x-api-key", SERVICE_API_KEY.to_string())
            .json(&body)
            .await
    }

    /// Complete a free generation for a guest.
    pub async fn complete_for_guest(&self, guest: &str, generation_id: &str) -> TestResponse {
        self.complete(json!({ "generation_id": generation_id, "guest_id": guest }))
            .await
    }

    /// Complete a free generation for the harness account.
    pub async fn complete_for_account(&self, generation_id: &str) -> TestResponse {
        self.complete(json!({
            "generation_id": generation_id,
            "account_id": self.account_id.to_string(),
        }))
        .await
    }

    /// Log the harness account in, carrying a guest id.
    pub async fn merge(&self, guest: &str) -> TestResponse {
        self.server
            .post("/v1/identity/merge")
            .add_header("authorization", self.account_auth_header())
            .json(&json!({ "guest_id": guest }))
            .await
    }

    /// Deliver a signed `checkout.session.completed` webhook.
    pub async fn stripe_checkout(
        &self,
        session_id: &str,
        payment_status: &str,
        metadata: Value,
    ) -> TestResponse {
        let payload = checkout_payload(session_id, payment_status, metadata);
        let signature = sign_webhook_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());

        self.server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", signature)
            .text(payload)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Authorization header for an arbitrary account.
pub fn account_auth_header(account_id: AccountId) -> String {
    format!("Bearer test-token:{account_id}")
}

/// Ledger key of a guest.
pub fn guest_key(guest: &str) -> LedgerKey {
    Identity::Guest(GuestId::new(guest).unwrap()).ledger_key()
}

/// Ledger key of an account.
pub fn account_key(account_id: AccountId) -> LedgerKey {
    Identity::Account(account_id).ledger_key()
}

/// Raw Stripe event body for a checkout session.
pub fn checkout_payload(session_id: &str, payment_status: &str, metadata: Value) -> String {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": payment_status,
                "amount_total": 299,
                "currency": "usd",
                "metadata": metadata,
            }
        }
    })
    .to_string()
}
