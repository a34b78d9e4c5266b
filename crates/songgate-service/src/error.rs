//! API error types and responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use songgate_core::{IdError, LedgerError};

/// Seconds a client should wait before retrying after a store outage.
const RETRY_AFTER_SECONDS: &str = "1";

/// Why a generation needs payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRequiredReason {
    /// The identity's free generation is used and no credit was offered.
    FreeQuotaExhausted,
    /// The offered credit has already been spent.
    CreditAlreadyConsumed,
    /// No credit exists for the offered transaction id.
    CreditNotFound,
}

impl PaymentRequiredReason {
    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreeQuotaExhausted => "free_quota_exhausted",
            Self::CreditAlreadyConsumed => "credit_already_consumed",
            Self::CreditNotFound => "credit_not_found",
        }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The generation must be paid for. An expected outcome, carrying what
    /// the client needs to start a purchase.
    #[error("payment required: {}", .reason.as_str())]
    PaymentRequired {
        /// Why payment is required.
        reason: PaymentRequiredReason,
        /// Free generations the caller has used.
        free_credits_used: i64,
        /// The credit that was offered, if any.
        transaction_id: Option<String>,
    },

    /// The backing store is unavailable; retry later.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::PaymentRequired {
                reason,
                free_credits_used,
                transaction_id,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_required",
                "A purchased credit is required for this generation".to_string(),
                Some(serde_json::json!({
                    "reason": reason,
                    "free_credits_used": free_credits_used,
                    "transaction_id": transaction_id,
                })),
            ),
            Self::ServiceUnavailable(msg) => {
                tracing::warn!(error = %msg, "Store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "Temporarily unavailable, please retry".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::StoreUnavailable(msg) => Self::ServiceUnavailable(msg),
            LedgerError::UniquenessRace { key } => {
                Self::ServiceUnavailable(format!("uniqueness race on {key}"))
            }
            LedgerError::Storage(msg) => Self::Internal(msg),
            LedgerError::InvalidId(e) => Self::BadRequest(e.to_string()),
            LedgerError::Anonymous => {
                Self::BadRequest("a guest id or an account session is required".into())
            }
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
