//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the primary
//! records and their indexes. All index keys are laid out so that a prefix
//! scan returns exactly the entries for one owner, user, status or call, and
//! mailbox keys sort by enqueue time.

use chrono::{DateTime, Utc};
use tether_core::{CallId, ConnectionId, ContactAddress, MessageId, UserId};

/// Length of every UUID-based identifier.
pub const ID_LEN: usize = 16;

/// Length of an encoded timestamp.
const TS_LEN: usize = 8;

/// Separator between a contact address and the connection ID.
const CONTACT_SEPARATOR: u8 = 0x00;

/// Encode a timestamp as big-endian nanoseconds since the epoch.
///
/// Timestamps before the epoch (or beyond the `i64` nanosecond range) clamp
/// to zero, which keeps them sorted before every real message.
#[must_use]
pub fn encode_timestamp(at: &DateTime<Utc>) -> [u8; TS_LEN] {
    let nanos = at
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    nanos.to_be_bytes()
}

/// Decode a timestamp written by [`encode_timestamp`].
fn decode_timestamp(bytes: [u8; TS_LEN]) -> DateTime<Utc> {
    let nanos = i64::try_from(u64::from_be_bytes(bytes)).unwrap_or(i64::MAX);
    DateTime::from_timestamp_nanos(nanos)
}

/// The smallest key greater than every key starting with `prefix`.
///
/// `None` when the prefix is all `0xff` and nothing sorts after it.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let last = prefix.iter().rposition(|b| *b != 0xff)?;
    let mut next = prefix[..=last].to_vec();
    next[last] += 1;
    Some(next)
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut key = Vec::with_capacity(len);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn id_at(key: &[u8], offset: usize) -> Option<[u8; ID_LEN]> {
    key.get(offset..offset + ID_LEN)?.try_into().ok()
}

// =============================================================================
// Connections
// =============================================================================

/// Encode a connection key (just the connection ID bytes).
#[must_use]
pub fn connection_key(id: &ConnectionId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a user-connection index key: `user_id || connection_id`.
///
/// Used for both the owner and the companion index.
#[must_use]
pub fn user_connection_key(user_id: &UserId, id: &ConnectionId) -> Vec<u8> {
    concat(&[user_id.as_bytes(), id.as_bytes()])
}

/// Extract the connection ID from a user-connection key.
#[must_use]
pub fn connection_id_from_user_key(key: &[u8]) -> Option<ConnectionId> {
    id_at(key, ID_LEN).map(ConnectionId::from_bytes)
}

/// Encode a contact prefix: `contact || 0x00`.
#[must_use]
pub fn contact_prefix(contact: &ContactAddress) -> Vec<u8> {
    concat(&[contact.as_str().as_bytes(), &[CONTACT_SEPARATOR]])
}

/// Encode a contact-connection index key: `contact || 0x00 || connection_id`.
#[must_use]
pub fn contact_connection_key(contact: &ContactAddress, id: &ConnectionId) -> Vec<u8> {
    concat(&[&contact_prefix(contact), id.as_bytes()])
}

/// Extract the connection ID from a contact-connection key.
#[must_use]
pub fn connection_id_from_contact_key(key: &[u8]) -> Option<ConnectionId> {
    let offset = key.len().checked_sub(ID_LEN)?;
    id_at(key, offset).map(ConnectionId::from_bytes)
}

/// Encode an identity key (the normalized contact address).
#[must_use]
pub fn identity_key(contact: &ContactAddress) -> Vec<u8> {
    contact.as_str().as_bytes().to_vec()
}

// =============================================================================
// Users
// =============================================================================

/// Encode a user prefix for scanning any per-user index.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Encode a presence key (just the user ID bytes).
#[must_use]
pub fn presence_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

// =============================================================================
// Calls
// =============================================================================

/// Encode a call key (just the call ID bytes).
#[must_use]
pub fn call_key(id: &CallId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a participant-call index key: `user_id || call_id`.
#[must_use]
pub fn participant_call_key(user_id: &UserId, id: &CallId) -> Vec<u8> {
    concat(&[user_id.as_bytes(), id.as_bytes()])
}

/// Extract the call ID from a participant-call key.
#[must_use]
pub fn call_id_from_participant_key(key: &[u8]) -> Option<CallId> {
    id_at(key, ID_LEN).map(CallId::from_bytes)
}

/// Encode a status-call index key: `status || call_id`.
#[must_use]
pub fn status_call_key(status: u8, id: &CallId) -> Vec<u8> {
    concat(&[&[status], id.as_bytes()])
}

/// Encode a status prefix for scanning all calls with a given status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the call ID from a status-call key.
#[must_use]
pub fn call_id_from_status_key(key: &[u8]) -> Option<CallId> {
    id_at(key, 1).map(CallId::from_bytes)
}

// =============================================================================
// Signals
// =============================================================================

/// Encode a mailbox key: `to_user_id || created_at || message_id`.
#[must_use]
pub fn mailbox_key(to_user_id: &UserId, created_at: &DateTime<Utc>, id: &MessageId) -> Vec<u8> {
    concat(&[
        to_user_id.as_bytes(),
        &encode_timestamp(created_at),
        id.as_bytes(),
    ])
}

/// Encode the first mailbox key strictly after `since` for a user.
///
/// Scanning forward from this key yields every message with
/// `created_at > since`, oldest first.
#[must_use]
pub fn mailbox_seek_after(to_user_id: &UserId, since: &DateTime<Utc>) -> Vec<u8> {
    let nanos = u64::from_be_bytes(encode_timestamp(since)).saturating_add(1);
    concat(&[to_user_id.as_bytes(), &nanos.to_be_bytes()])
}

/// Encode a call-signal index key: `call_id || created_at || message_id`.
#[must_use]
pub fn call_signal_key(call_id: &CallId, created_at: &DateTime<Utc>, id: &MessageId) -> Vec<u8> {
    concat(&[
        call_id.as_bytes(),
        &encode_timestamp(created_at),
        id.as_bytes(),
    ])
}

/// Encode a call prefix for scanning all signals of a call.
#[must_use]
pub fn call_prefix(call_id: &CallId) -> Vec<u8> {
    call_id.as_bytes().to_vec()
}

/// Extract the call ID from a call-signal key.
#[must_use]
pub fn call_id_from_signal_key(key: &[u8]) -> Option<CallId> {
    id_at(key, 0).map(CallId::from_bytes)
}

/// Extract `created_at` from a mailbox or call-signal key.
///
/// Both layouts put the timestamp right after a 16-byte ID.
#[must_use]
pub fn signal_time_from_key(key: &[u8]) -> Option<DateTime<Utc>> {
    let bytes: [u8; TS_LEN] = key.get(ID_LEN..ID_LEN + TS_LEN)?.try_into().ok()?;
    Some(decode_timestamp(bytes))
}

/// Rebuild the mailbox key for a call-signal index entry.
///
/// The index value holds the recipient's user ID; the rest of the mailbox
/// key is the index key without its call ID prefix.
#[must_use]
pub fn mailbox_key_from_call_signal(index_key: &[u8], to_user_bytes: &[u8]) -> Option<Vec<u8>> {
    let suffix = index_key.get(ID_LEN..)?;
    if suffix.len() != TS_LEN + ID_LEN || to_user_bytes.len() != ID_LEN {
        return None;
    }
    Some(concat(&[to_user_bytes, suffix]))
}
