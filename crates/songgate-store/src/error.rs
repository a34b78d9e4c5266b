//! Error types for songgate storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection, pool timeout, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A natural-key uniqueness constraint was violated.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// The constraint or key that conflicted.
        constraint: String,
    },

    /// The transaction lost a lock or serialization conflict.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<songgate_core::IdError> for StoreError {
    fn from(err: songgate_core::IdError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StoreError> for songgate_core::LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) | StoreError::Conflict(msg) => Self::StoreUnavailable(msg),
            StoreError::UniqueViolation { constraint } => Self::UniquenessRace { key: constraint },
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Storage(msg),
        }
    }
}
