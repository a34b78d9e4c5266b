//! Client error types.

/// Errors that can occur when using the songgate client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The generation must be paid for. An expected outcome: start a
    /// purchase flow.
    #[error("payment required: {reason}")]
    PaymentRequired {
        /// `free_quota_exhausted`, `credit_already_consumed` or
        /// `credit_not_found`.
        reason: String,
        /// Free generations the caller has used.
        free_credits_used: i64,
        /// The credit that was offered, if any.
        transaction_id: Option<String>,
    },

    /// The service's store is unavailable; retry later.
    #[error("service unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
        /// Seconds to wait, from `Retry-After`.
        retry_after_seconds: Option<u64>,
    },

    /// Credit not found.
    #[error("credit not found: {transaction_id}")]
    CreditNotFound {
        /// The transaction ID.
        transaction_id: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
