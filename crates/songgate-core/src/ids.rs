//! Identifier types for songgate.
//!
//! Account identifiers are UUIDs issued by the hosted auth backend. Guest,
//! transaction and generation identifiers come from outside the server
//! (the browser, the payment processor, the generation pipeline) and are
//! validated on parse so that nothing unbounded reaches the store.
//!
//! # Macro-based ID Types
//!
//! `uuid_id_type!` and `string_id_type!` generate the newtype, its parsing and
//! its serde representation so every identifier behaves the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a guest identifier.
pub const GUEST_ID_MAX_LEN: usize = 64;

/// Maximum length of a payment processor transaction identifier.
pub const TRANSACTION_ID_MAX_LEN: usize = 255;

/// Maximum length of a generation (song) identifier.
pub const GENERATION_ID_MAX_LEN: usize = 128;

/// Define a UUID-based identifier type with standard trait implementations.
///
/// Generates `Clone`, `Copy`, `Eq`, `Hash`, string serde, `FromStr`,
/// `Display`, `Debug` and `TryFrom<String>`.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier (primarily for testing).
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

/// Define a validated string identifier.
///
/// `$kind` names the identifier in error messages, `$max` bounds its length
/// and `$allowed` decides which characters are accepted.
macro_rules! string_id_type {
    ($name:ident, $kind:expr, $max:expr, $allowed:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long, or contains
            /// characters outside the accepted set.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate(&value, $kind, $max, $allowed)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

fn validate(
    value: &str,
    kind: &'static str,
    max: usize,
    allowed: fn(char) -> bool,
) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if value.len() > max {
        return Err(IdError::TooLong { kind, max });
    }
    if let Some(found) = value.chars().find(|c| !allowed(*c)) {
        return Err(IdError::InvalidCharacter { kind, found });
    }
    Ok(())
}

fn is_guest_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn is_external_char(c: char) -> bool {
    c.is_ascii_graphic()
}

uuid_id_type!(
    AccountId,
    "A server-issued account identifier.\n\nExtracted from the `sub` claim of a verified session token."
);

string_id_type!(
    GuestId,
    "guest id",
    GUEST_ID_MAX_LEN,
    is_guest_char,
    "A client-generated guest identifier.\n\nOwnership is never verified by the server; it only scopes anonymous usage until login."
);

string_id_type!(
    TransactionId,
    "transaction id",
    TRANSACTION_ID_MAX_LEN,
    is_external_char,
    "A payment processor transaction identifier (for example a checkout session id)."
);

string_id_type!(
    GenerationId,
    "generation id",
    GENERATION_ID_MAX_LEN,
    is_external_char,
    "A song identifier assigned by the generation pipeline."
);

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is empty.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier was being parsed.
        kind: &'static str,
    },

    /// The input exceeds the maximum length.
    #[error("{kind} exceeds {max} characters")]
    TooLong {
        /// Which identifier was being parsed.
        kind: &'static str,
        /// Maximum accepted length.
        max: usize,
    },

    /// The input contains a character outside the accepted set.
    #[error("{kind} contains invalid character {found:?}")]
    InvalidCharacter {
        /// Which identifier was being parsed.
        kind: &'static str,
        /// The offending character.
        found: char,
    },

    /// A ledger key without a recognised namespace.
    #[error("invalid ledger key: {0}")]
    InvalidLedgerKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_roundtrip() {
        let id = AccountId::generate();
        let parsed = AccountId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn account_id_rejects_non_uuid() {
        assert_eq!(AccountId::from_str("user-1"), Err(IdError::InvalidUuid));
    }

    #[test]
    fn guest_id_accepts_client_formats() {
        assert!(GuestId::new("g_7f3a9c2e-41b0-4d1e-9a77-3c1d2e0f9b11").is_ok());
        assert!(GuestId::new("device:abc.123").is_ok());
    }

    #[test]
    fn guest_id_rejects_empty_and_long() {
        assert_eq!(GuestId::new(""), Err(IdError::Empty { kind: "guest id" }));
        let long = "a".repeat(GUEST_ID_MAX_LEN + 1);
        assert_eq!(
            GuestId::new(long),
            Err(IdError::TooLong {
                kind: "guest id",
                max: GUEST_ID_MAX_LEN
            })
        );
        assert!(GuestId::new("a".repeat(GUEST_ID_MAX_LEN)).is_ok());
    }

    #[test]
    fn guest_id_rejects_whitespace() {
        assert_eq!(
            GuestId::new("bad id"),
            Err(IdError::InvalidCharacter {
                kind: "guest id",
                found: ' '
            })
        );
    }

    #[test]
    fn transaction_id_serde_json() {
        let id = TransactionId::new("cs_test_a1B2c3").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cs_test_a1B2c3\"");
        let parsed: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn generation_id_rejects_invalid_json() {
        let result: Result<GenerationId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }
}
