//! Stripe webhook handler: the payment-confirmed event.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use songgate_core::{AccountId, GuestId, Identity, TransactionId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{verify_webhook_signature, CheckoutSession, WebhookEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    if let Some(webhook_secret) = &state.config.stripe_webhook_secret {
        let sig = signature
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

        verify_webhook_signature(&body, sig, webhook_secret).map_err(|e| {
            tracing::warn!(error = %e, "Invalid Stripe webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        // No webhook_secret configured - skip verification (development mode)
        tracing::warn!("Stripe webhook_secret not configured - skipping signature verification");
    }

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSession = serde_json::from_value(event.data.object)
                .map_err(|e| ApiError::BadRequest(format!("Invalid checkout session: {e}")))?;
            handle_checkout_completed(&state, session).await?;
        }
        _ => {
            tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

async fn handle_checkout_completed(
    state: &AppState,
    session: CheckoutSession,
) -> Result<(), ApiError> {
    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid yet, skipping"
        );
        return Ok(());
    }

    // Redelivery cannot fix a session without a usable owner, so it is
    // acknowledged rather than left for Stripe to retry.
    let owner = match checkout_owner(&session) {
        Ok(owner) => owner,
        Err(e) => {
            tracing::error!(
                session_id = %session.id,
                error = %e,
                "Paid checkout has no usable owner, no credit granted"
            );
            return Ok(());
        }
    };
    let transaction_id = TransactionId::new(session.id)?;
    let amount_cents = session.amount_total.unwrap_or(0);

    tracing::info!(
        transaction_id = %transaction_id,
        owner = %owner,
        amount_cents,
        "Processing checkout completion"
    );

    state
        .ledger
        .grant_paid_credit(transaction_id, owner, amount_cents)
        .await?;

    Ok(())
}

/// Who a checkout session pays for.
///
/// Metadata wins over `client_reference_id`; a reference that parses as a
/// UUID is an account, anything else a guest.
fn checkout_owner(session: &CheckoutSession) -> Result<Identity, ApiError> {
    if let Some(account) = &session.metadata.account_id {
        return Ok(Identity::Account(account.parse::<AccountId>()?));
    }
    if let Some(guest) = &session.metadata.guest_id {
        return Ok(Identity::Guest(GuestId::new(guest.as_str())?));
    }
    match &session.client_reference_id {
        Some(reference) => Ok(reference.parse::<AccountId>().map_or_else(
            |_| GuestId::new(reference.as_str()).map(Identity::Guest),
            |account| Ok(Identity::Account(account)),
        )?),
        None => Err(ApiError::BadRequest(
            "Checkout session carries no owner".into(),
        )),
    }
}
