//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, credits, generations, health, identity, quota, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for generation gating and completion.
/// These sit on the hot path of every song, so they get the larger share.
const GENERATION_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Maximum concurrent admin requests; sweeps are heavy.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 2;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Caller identity (optional JWT and/or `X-Guest-Id`)
/// - `GET /v1/quota` - Is the next generation free?
/// - `POST /v1/generations/authorize` - Free, paid, or payment required
///
/// ## Account JWT
/// - `POST /v1/identity/merge` - Login hook, fold guest history into the account
///
/// ## Service API key
/// - `POST /v1/generations/completed` - Generation-completed event
/// - `GET /v1/credits/:transaction_id` - Credit state
/// - `POST /v1/credits/:transaction_id/consume` - Spend a credit
///
/// ## Admin API key
/// - `POST /v1/admin/reconcile` - Reconcile one identity
/// - `POST /v1/admin/reconcile/sweep` - Reconcile every row
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe payment confirmation
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let generation_routes = Router::new()
        .route("/authorize", post(generations::authorize))
        .route("/completed", post(generations::completed))
        .layer(ConcurrencyLimitLayer::new(GENERATION_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/reconcile", post(admin::reconcile))
        .route("/reconcile/sweep", post(admin::sweep))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .route("/quota", get(quota::get_quota))
        .route("/identity/merge", post(identity::merge))
        .route("/credits/:transaction_id", get(credits::get_credit))
        .route(
            "/credits/:transaction_id/consume",
            post(credits::consume_credit),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/generations", generation_routes)
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by external services)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
