//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Usage ledger rows, keyed by ledger key (`guest:<id>` / `account:<uuid>`).
    pub const USAGE_LEDGER: &str = "usage_ledger";

    /// Merged guests, keyed by guest id. Value is the account UUID.
    pub const GUEST_LINKS: &str = "guest_links";

    /// Index: merged guests by account, keyed by `account_uuid || guest_id`.
    /// Value is empty (index only).
    pub const GUEST_LINKS_BY_ACCOUNT: &str = "guest_links_by_account";

    /// Payment credits, keyed by transaction id.
    pub const PAYMENT_CREDITS: &str = "payment_credits";

    /// Completed generations, keyed by generation id.
    pub const GENERATIONS: &str = "generations";

    /// Index: free generations by attributed ledger key, keyed by
    /// `ledger_key || 0x00 || generation_id`. Value is empty (index only).
    pub const FREE_GENERATIONS_BY_OWNER: &str = "free_generations_by_owner";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::USAGE_LEDGER,
        cf::GUEST_LINKS,
        cf::GUEST_LINKS_BY_ACCOUNT,
        cf::PAYMENT_CREDITS,
        cf::GENERATIONS,
        cf::FREE_GENERATIONS_BY_OWNER,
    ]
}
