//! Identities and the ledger's natural key.
//!
//! Every ledger row belongs to exactly one identity. The textual form of an
//! identity (`guest:<id>` or `account:<uuid>`) is the row's natural key, so a
//! guest identifier can never collide with an account identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{AccountId, GuestId, IdError};

const GUEST_PREFIX: &str = "guest:";
const ACCOUNT_PREFIX: &str = "account:";

/// The unit the usage ledger is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    /// An anonymous visitor identified by a client-generated id.
    Guest(GuestId),
    /// An authenticated account.
    Account(AccountId),
}

impl Identity {
    /// The natural key of this identity's ledger row.
    #[must_use]
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey(self.to_string())
    }

    /// The account id, if this is an account identity.
    #[must_use]
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Account(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    /// The guest id, if this is a guest identity.
    #[must_use]
    pub fn guest_id(&self) -> Option<&GuestId> {
        match self {
            Self::Guest(id) => Some(id),
            Self::Account(_) => None,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Guest(_) => "guest",
            Self::Account(_) => "account",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest(id) => write!(f, "{GUEST_PREFIX}{id}"),
            Self::Account(id) => write!(f, "{ACCOUNT_PREFIX}{id}"),
        }
    }
}

impl FromStr for Identity {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(GUEST_PREFIX) {
            return Ok(Self::Guest(rest.parse()?));
        }
        if let Some(rest) = s.strip_prefix(ACCOUNT_PREFIX) {
            return Ok(Self::Account(rest.parse()?));
        }
        Err(IdError::InvalidLedgerKey(s.to_string()))
    }
}

impl TryFrom<String> for Identity {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

impl From<GuestId> for Identity {
    fn from(id: GuestId) -> Self {
        Self::Guest(id)
    }
}

impl From<AccountId> for Identity {
    fn from(id: AccountId) -> Self {
        Self::Account(id)
    }
}

/// The natural key of a usage ledger row.
///
/// Always the textual form of an [`Identity`]; constructed only from one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerKey(String);

impl LedgerKey {
    /// Borrow the key as stored.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the identity this key belongs to.
    ///
    /// # Errors
    ///
    /// Never fails for keys built from an identity; returns an error only if
    /// the key was read from a corrupted store.
    pub fn identity(&self) -> Result<Identity, IdError> {
        self.0.parse()
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LedgerKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<Identity>()?.ledger_key())
    }
}

impl TryFrom<String> for LedgerKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LedgerKey> for String {
    fn from(key: LedgerKey) -> Self {
        key.0
    }
}

impl AsRef<str> for LedgerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The identifiers carried by an inbound request.
///
/// Both may be present when a visitor has signed in but the guest history has
/// not been merged yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Guest identifier sent by the client, if any.
    pub guest: Option<GuestId>,
    /// Verified account identifier, if the request is authenticated.
    pub account: Option<AccountId>,
}

impl RequestIdentity {
    /// A request carrying only a guest identifier.
    #[must_use]
    pub fn guest(id: GuestId) -> Self {
        Self {
            guest: Some(id),
            account: None,
        }
    }

    /// A request carrying only an account identifier.
    #[must_use]
    pub fn account(id: AccountId) -> Self {
        Self {
            guest: None,
            account: Some(id),
        }
    }

    /// The identity whose ledger row governs this request.
    ///
    /// The account wins when both identifiers are present.
    #[must_use]
    pub fn primary(&self) -> Option<Identity> {
        self.account
            .map(Identity::Account)
            .or_else(|| self.guest.clone().map(Identity::Guest))
    }

    /// Whether the request carries no identifier at all.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.guest.is_none() && self.account.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_key_is_namespaced() {
        let guest = Identity::Guest(GuestId::new("g1").unwrap());
        assert_eq!(guest.ledger_key().as_str(), "guest:g1");

        let account_id = AccountId::generate();
        let account = Identity::Account(account_id);
        assert_eq!(
            account.ledger_key().as_str(),
            format!("account:{account_id}")
        );
    }

    #[test]
    fn ledger_key_recovers_identity() {
        let identity = Identity::Account(AccountId::generate());
        let key = identity.ledger_key();
        assert_eq!(key.identity().unwrap(), identity);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        assert!(matches!(
            "user:abc".parse::<Identity>(),
            Err(IdError::InvalidLedgerKey(_))
        ));
    }

    #[test]
    fn guest_id_shaped_like_account_key_stays_guest() {
        let guest = GuestId::new("account:x").unwrap();
        let key = Identity::Guest(guest.clone()).ledger_key();
        assert_eq!(key.identity().unwrap(), Identity::Guest(guest));
    }

    #[test]
    fn account_wins_over_guest() {
        let account_id = AccountId::generate();
        let request = RequestIdentity {
            guest: Some(GuestId::new("g1").unwrap()),
            account: Some(account_id),
        };
        assert_eq!(request.primary(), Some(Identity::Account(account_id)));
    }

    #[test]
    fn anonymous_request_has_no_primary() {
        let request = RequestIdentity::default();
        assert!(request.is_anonymous());
        assert_eq!(request.primary(), None);
    }

    #[test]
    fn identity_serializes_as_key() {
        let identity = Identity::Guest(GuestId::new("g2").unwrap());
        let json = serde_json::to_string(&identity).unwrap();
        assert_eq!(json, "\"guest:g2\"");
        let parsed: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, identity);
    }
}
