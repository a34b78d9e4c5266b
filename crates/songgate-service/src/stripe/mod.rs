//! Stripe webhook intake.
//!
//! Only the inbound side lives here: signature verification and the event
//! shapes the payment-confirmed handler reads. Checkout sessions are created
//! by the web front end.

pub mod types;

pub use types::{CheckoutSession, WebhookEvent};

use chrono::Utc;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Webhook signature verification errors.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The `Stripe-Signature` header has no timestamp.
    #[error("missing timestamp")]
    MissingTimestamp,

    /// The header carries no `v1` signature.
    #[error("missing v1 signature")]
    MissingSignature,

    /// The timestamp is outside the tolerance window.
    #[error("timestamp outside tolerance")]
    Expired,

    /// No signature matched.
    #[error("invalid webhook signature")]
    Invalid,
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
/// `"{t}.{body}"`.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify_webhook_signature(
    payload: &str,
    header: &str,
    secret: &str,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MissingTimestamp)?;
    if (Utc::now().timestamp() - signed_at).abs() > SIGNATURE_TOLERANCE_SECONDS {
        return Err(SignatureError::Expired);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .ok_or(SignatureError::Invalid)?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}

/// Build a `Stripe-Signature` header for `payload`, as Stripe would.
#[must_use]
pub fn sign_webhook_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}")).unwrap_or_default();
    format!("t={timestamp},v1={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn accepts_fresh_signature() {
        let header = sign_webhook_payload("{}", SECRET, Utc::now().timestamp());
        assert!(verify_webhook_signature("{}", &header, SECRET).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_webhook_payload("{}", SECRET, Utc::now().timestamp());
        assert!(matches!(
            verify_webhook_signature("{\"x\":1}", &header, SECRET),
            Err(SignatureError::Invalid)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_webhook_payload("{}", SECRET, Utc::now().timestamp() - 3600);
        assert!(matches!(
            verify_webhook_signature("{}", &header, SECRET),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn accepts_any_matching_v1() {
        let now = Utc::now().timestamp();
        let good = sign_webhook_payload("{}", SECRET, now);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={now},v1=deadbeef,v1={good_sig}");
        assert!(verify_webhook_signature("{}", &header, SECRET).is_ok());
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(matches!(
            verify_webhook_signature("{}", "v1=abc", SECRET),
            Err(SignatureError::MissingTimestamp)
        ));
        assert!(matches!(
            verify_webhook_signature("{}", "t=1", SECRET),
            Err(SignatureError::MissingSignature)
        ));
    }
}
