//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary connection records, keyed by `connection_id`.
    pub const CONNECTIONS: &str = "connections";

    /// Index: connections by owner, keyed by `owner_id || connection_id`.
    pub const CONNECTIONS_BY_OWNER: &str = "connections_by_owner";

    /// Index: connections by resolved companion, keyed by `companion_id || connection_id`.
    pub const CONNECTIONS_BY_COMPANION: &str = "connections_by_companion";

    /// Index: connections by invite address, keyed by `contact || 0x00 || connection_id`.
    pub const CONNECTIONS_BY_CONTACT: &str = "connections_by_contact";

    /// Known accounts, keyed by normalized contact address.
    pub const IDENTITIES: &str = "identities";

    /// Presence records, keyed by `user_id`.
    pub const PRESENCE: &str = "presence";

    /// Primary call records, keyed by `call_id`.
    pub const CALLS: &str = "calls";

    /// Index: calls by participant, keyed by `user_id || call_id`.
    pub const CALLS_BY_PARTICIPANT: &str = "calls_by_participant";

    /// Index: calls by status, keyed by `status || call_id`.
    pub const CALLS_BY_STATUS: &str = "calls_by_status";

    /// Signaling mailboxes, keyed by `to_user_id || created_at || message_id`.
    pub const SIGNALS: &str = "signals";

    /// Index: signals by call, keyed by `call_id || created_at || message_id`.
    pub const SIGNALS_BY_CALL: &str = "signals_by_call";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CONNECTIONS,
        cf::CONNECTIONS_BY_OWNER,
        cf::CONNECTIONS_BY_COMPANION,
        cf::CONNECTIONS_BY_CONTACT,
        cf::IDENTITIES,
        cf::PRESENCE,
        cf::CALLS,
        cf::CALLS_BY_PARTICIPANT,
        cf::CALLS_BY_STATUS,
        cf::SIGNALS,
        cf::SIGNALS_BY_CALL,
    ]
}
