//! API handlers.

pub mod admin;
pub mod credits;
pub mod generations;
pub mod health;
pub mod identity;
pub mod quota;
pub mod webhooks;

use axum::http::HeaderMap;

/// Best-effort client address from proxy headers.
///
/// Advisory only; never used for authorization.
pub(crate) fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
