//! Request and response types for the songgate client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songgate_core::{AccountId, GenerationId, GuestId, TransactionId};

/// The identity an end-user request is made on behalf of.
///
/// Forwarded by the web front end's server side: the visitor's guest id and,
/// once they are signed in, their session token.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// Guest identifier stored on the client.
    pub guest_id: Option<GuestId>,
    /// Account session token (JWT).
    pub account_token: Option<String>,
}

impl Caller {
    /// An anonymous visitor.
    #[must_use]
    pub fn guest(guest_id: GuestId) -> Self {
        Self {
            guest_id: Some(guest_id),
            account_token: None,
        }
    }

    /// A signed-in visitor.
    #[must_use]
    pub fn account(token: impl Into<String>) -> Self {
        Self {
            guest_id: None,
            account_token: Some(token.into()),
        }
    }

    /// Also send the guest id.
    #[must_use]
    pub fn with_guest(mut self, guest_id: GuestId) -> Self {
        self.guest_id = Some(guest_id);
        self
    }
}

/// Quota status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QuotaResponse {
    /// Whether the next generation is free.
    pub is_free: bool,
    /// Free generations used so far.
    pub free_credits_used: i64,
}

/// Authorize request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthorizeRequest {
    /// Purchased credit to spend if the free generation is used up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

/// How a generation is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The identity's free generation.
    Free,
    /// A purchased credit was spent.
    Paid,
}

/// Authorize response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResponse {
    /// How the generation is funded.
    pub decision: Decision,
    /// Free generations used so far.
    pub free_credits_used: i64,
    /// The credit spent, for paid generations.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Generation-completed event.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationCompleted {
    /// Song id; redelivering the same id is safe.
    pub generation_id: GenerationId,
    /// Requesting guest, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<GuestId>,
    /// Requesting account, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    /// Credit that funded the generation, if it was paid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    /// Advisory client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_address: Option<String>,
}

/// Response to a generation-completed event.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedResponse {
    /// Whether this call wrote the record.
    pub recorded: bool,
    /// Whether the generation id had been recorded before.
    pub duplicate: bool,
    /// Ledger row the generation was attributed to.
    pub key: String,
    /// Free usage of that row after the write.
    pub free_credits_used: i64,
}

/// Merge request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeRequest {
    /// Guest identifier stored on the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<GuestId>,
    /// Advisory client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_address: Option<String>,
}

/// Merge response.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeResponse {
    /// Whether a guest row was folded in by this call.
    pub merged: bool,
    /// The account's free usage after the call, when known.
    #[serde(default)]
    pub combined_free_credits_used: Option<i64>,
    /// The merge should be retried at the next login.
    #[serde(default)]
    pub deferred: bool,
}

/// Payment credit state.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditResponse {
    /// Processor transaction id.
    pub transaction_id: String,
    /// Remaining uses (0 or 1).
    pub available_credits: i64,
    /// When the credit was spent.
    pub consumed_at: Option<DateTime<Utc>>,
    /// Owning identity (`guest:<id>` or `account:<uuid>`).
    pub owner: String,
    /// Processor-reported amount.
    pub amount_cents: i64,
    /// When the payment was confirmed.
    pub created_at: DateTime<Utc>,
}

/// Consume response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeResponse {
    /// Always true; a credit that cannot be spent is an error.
    pub consumed: bool,
    /// The credit that was spent.
    pub transaction_id: String,
    /// When it was spent.
    pub consumed_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Store status.
    pub store: String,
}

/// API error response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
