//! songgate HTTP API service.
//!
//! This crate provides the ledger engine and the HTTP API around it:
//!
//! - Quota status for the front end's paywall
//! - Generation authorization and the generation-completed event
//! - Identity merge at login
//! - Payment credit intake (Stripe webhook) and single-use consumption
//! - On-demand and scheduled reconciliation
//!
//! # Authentication
//!
//! The service supports three authentication methods:
//!
//! 1. **JWT tokens** from the hosted auth backend, plus the unverified
//!    `X-Guest-Id` header, for end-user requests
//! 2. **Service API keys** for the generation pipeline
//! 3. **Admin API keys** for reconciliation

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::{ApiError, PaymentRequiredReason};
pub use ledger::Ledger;
pub use routes::create_router;
pub use state::AppState;
