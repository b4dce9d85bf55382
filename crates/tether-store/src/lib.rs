//! `RocksDB` storage layer for tether.
//!
//! This crate provides persistent storage for connections, presence records,
//! calls and signaling mailboxes using `RocksDB` with column families for
//! efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `connections`: Primary connection records, keyed by `connection_id`
//! - `connections_by_owner` / `connections_by_companion`: Per-user indexes
//! - `connections_by_contact`: Index used to resolve pending invites
//! - `identities`: Contact address to known account
//! - `presence`: One record per user, overwritten on heartbeat
//! - `calls`: Primary call records, keyed by `call_id`
//! - `calls_by_participant` / `calls_by_status`: Call indexes
//! - `signals`: Per-recipient mailboxes ordered by enqueue time
//! - `signals_by_call`: Index used to drop a call's mailbox entries
//!
//! # Concurrency
//!
//! Every mutating operation runs under a single store-wide write lock and
//! commits one `WriteBatch`. The conditional operations
//! ([`Store::modify_call`], [`Store::insert_call_if_idle`], ...) therefore
//! behave as atomic compare-and-set steps even with many concurrent callers.
//!
//! # Example
//!
//! ```no_run
//! use tether_store::{RocksStore, Store};
//! use tether_core::UserId;
//!
//! let store = RocksStore::open("/tmp/tether-db").unwrap();
//!
//! // List connections owned by a user
//! let user_id = UserId::from_bytes([0u8; 16]);
//! let connections = store.list_connections_by_owner(&user_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    Call, CallInsert, CallStatus, Conditional, Connection, ConnectionInsert, ConnectionStatus,
    PresenceRecord, PresenceStatus, SignalAppend, SignalKind, SignalingMessage,
};

use chrono::{DateTime, Utc};
use tether_core::{CallId, ConnectionId, ContactAddress, UserId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Connection Operations
    // =========================================================================

    /// Insert a connection unless a non-revoked one exists for the same
    /// `(owner_id, companion_contact)` pair.
    ///
    /// Fails softly with `ConnectionInsert::LimitReached` when the owner
    /// already has `max_open` pending or active connections. If the contact
    /// is already bound to an account, `on_known` is called with that account
    /// before the record is written, under the same lock as
    /// [`Store::bind_identity`], so an invite can never miss a concurrent
    /// binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_connection_if_absent<F>(
        &self,
        connection: &Connection,
        max_open: u32,
        on_known: F,
    ) -> Result<ConnectionInsert>
    where
        F: FnOnce(&mut Connection, UserId);

    /// Get a connection by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>>;

    /// Atomically inspect and update a connection.
    ///
    /// `apply` receives the current record and returns `true` after mutating
    /// it, or `false` to leave it untouched. Indexes are kept in sync.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the connection doesn't exist.
    fn modify_connection<F>(&self, id: &ConnectionId, apply: F) -> Result<Conditional<Connection>>
    where
        F: FnOnce(&mut Connection) -> bool;

    /// List all connections owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_connections_by_owner(&self, owner_id: &UserId) -> Result<Vec<Connection>>;

    /// List all connections in which the user is the resolved companion.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_connections_by_companion(&self, companion_id: &UserId) -> Result<Vec<Connection>>;

    /// List all connections addressed to a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_connections_by_contact(&self, contact: &ContactAddress) -> Result<Vec<Connection>>;

    // =========================================================================
    // Identity Operations
    // =========================================================================

    /// Record that a contact address belongs to an account and update the
    /// connections addressed to it, in one atomic step.
    ///
    /// `activate` is called on every connection addressed to `contact`; those
    /// it returns `true` for are written back. Returns the updated records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn bind_identity<F>(
        &self,
        contact: &ContactAddress,
        user_id: &UserId,
        activate: F,
    ) -> Result<Vec<Connection>>
    where
        F: FnMut(&mut Connection) -> bool;

    /// Look up the account for a contact address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_identity(&self, contact: &ContactAddress) -> Result<Option<UserId>>;

    // =========================================================================
    // Presence Operations
    // =========================================================================

    /// Insert or overwrite a presence record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_presence(&self, record: &PresenceRecord) -> Result<()>;

    /// Get the presence record for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>>;

    // =========================================================================
    // Call Operations
    // =========================================================================

    /// Insert a call if its participants are connected and no non-terminal
    /// call already exists from the same initiator to the same recipient.
    ///
    /// The connection check runs under the write lock, so a concurrent
    /// revoke or block either lands first (`NotConnected`) or after the
    /// call exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_call_if_idle(&self, call: &Call) -> Result<CallInsert>;

    /// Get a call by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_call(&self, id: &CallId) -> Result<Option<Call>>;

    /// Atomically inspect and update a call.
    ///
    /// Same contract as [`Store::modify_connection`]; the status index is
    /// updated when the status changes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the call doesn't exist.
    fn modify_call<F>(&self, id: &CallId, apply: F) -> Result<Conditional<Call>>
    where
        F: FnOnce(&mut Call) -> bool;

    /// List all calls in which the user is a participant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_calls_by_participant(&self, user_id: &UserId) -> Result<Vec<Call>>;

    /// List all calls with a given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_calls_by_status(&self, status: CallStatus) -> Result<Vec<Call>>;

    // =========================================================================
    // Signaling Operations
    // =========================================================================

    /// Enqueue a signaling message if its call exists and is not terminal.
    ///
    /// The store assigns `created_at`, strictly greater than that of any
    /// message appended before; the caller's value is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_signal(&self, message: &SignalingMessage) -> Result<SignalAppend>;

    /// List up to `limit` messages addressed to a user with
    /// `created_at > since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_signals_since(
        &self,
        to_user_id: &UserId,
        since: &DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SignalingMessage>>;

    /// IDs of the calls that still have at least one stored message.
    ///
    /// Cost is proportional to the number of such calls, not to the number
    /// of calls ever placed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_calls_with_signals(&self) -> Result<Vec<CallId>>;

    /// Delete every message scoped to a call. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_signals_for_call(&self, call_id: &CallId) -> Result<usize>;
}
