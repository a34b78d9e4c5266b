//! Stripe webhook payload types.

use serde::Deserialize;

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe Checkout session object, as delivered in
/// `checkout.session.completed`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID; used as the credit's transaction id.
    pub id: String,
    /// Payment status ("paid", "unpaid", "no_payment_required").
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Total amount in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Client reference ID (account UUID or guest id).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata set when the session was created.
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

impl CheckoutSession {
    /// Whether the processor reports the session as paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

/// Identity metadata attached to a checkout session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutMetadata {
    /// Account the purchase is for.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Guest the purchase is for.
    #[serde(default)]
    pub guest_id: Option<String>,
}
