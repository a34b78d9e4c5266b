//! Key encoding utilities for `RocksDB`.
//!
//! Textual ids are stored as their UTF-8 bytes. Composite index keys use a
//! fixed-width or `0x00`-terminated prefix; no id type admits a NUL byte.

use songgate_core::{AccountId, GenerationId, GuestId, LedgerKey, TransactionId};

const SEPARATOR: u8 = 0x00;

/// Create a ledger row key.
#[must_use]
pub fn ledger_key(key: &LedgerKey) -> Vec<u8> {
    key.as_str().as_bytes().to_vec()
}

/// Create a guest link key.
#[must_use]
pub fn guest_link_key(guest: &GuestId) -> Vec<u8> {
    guest.as_str().as_bytes().to_vec()
}

/// Create an account-guest index key.
///
/// Format: `account_uuid (16 bytes) || guest_id`
#[must_use]
pub fn account_guest_key(account_id: &AccountId, guest: &GuestId) -> Vec<u8> {
    let mut key = account_guests_prefix(account_id);
    key.extend_from_slice(guest.as_str().as_bytes());
    key
}

/// Create a prefix for iterating all guests merged into an account.
#[must_use]
pub fn account_guests_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_uuid().as_bytes().to_vec()
}

/// Extract the guest id from an account-guest index key.
///
/// Returns `None` if the key is shorter than the account prefix or the
/// remainder is not a valid guest id.
#[must_use]
pub fn extract_guest_from_account_key(key: &[u8]) -> Option<GuestId> {
    let rest = key.get(16..)?;
    GuestId::new(std::str::from_utf8(rest).ok()?).ok()
}

/// Create a payment credit key.
#[must_use]
pub fn credit_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.as_str().as_bytes().to_vec()
}

/// Create a generation key.
#[must_use]
pub fn generation_key(generation_id: &GenerationId) -> Vec<u8> {
    generation_id.as_str().as_bytes().to_vec()
}

/// Create an owner-generation index key.
///
/// Format: `ledger_key || 0x00 || generation_id`
#[must_use]
pub fn owner_generation_key(owner: &LedgerKey, generation_id: &GenerationId) -> Vec<u8> {
    let mut key = owner_generations_prefix(owner);
    key.extend_from_slice(generation_id.as_str().as_bytes());
    key
}

/// Create a prefix for iterating all free generations attributed to a row.
#[must_use]
pub fn owner_generations_prefix(owner: &LedgerKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.as_str().len() + 1);
    key.extend_from_slice(owner.as_str().as_bytes());
    key.push(SEPARATOR);
    key
}
