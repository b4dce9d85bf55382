//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tether_core::{CallId, ConnectionId, ContactAddress, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{
    Call, CallInsert, CallStatus, Conditional, Connection, ConnectionInsert, ConnectionStatus,
    PresenceRecord, SignalAppend, SignalingMessage,
};
use crate::Store;

type Entry = (Box<[u8]>, Box<[u8]>);

/// State owned by whoever holds the write lock.
struct Writer {
    /// `created_at` of the most recently appended signal.
    last_signal_at: DateTime<Utc>,
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    writer: Mutex<Writer>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;

        let store = Self {
            db: Arc::new(db),
            writer: Mutex::new(Writer {
                last_signal_at: DateTime::<Utc>::MIN_UTC,
            }),
        };

        // Signals enqueued after a restart must still sort after the old ones.
        let last_signal_at = store.latest_signal_at()?;
        store.writer.lock().last_signal_at = last_signal_at;

        tracing::debug!(path = %path.as_ref().display(), "Opened store");
        Ok(store)
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode a single record.
    fn load<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf_name)?;
        self.db
            .get_cf(&handle, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect every entry whose key starts with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Entry>> {
        let handle = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// The last key of every group of keys sharing a `group_len`-byte prefix.
    ///
    /// Seeks from group to group, so the cost is one seek pair per group
    /// rather than one step per entry.
    fn last_key_per_group(&self, cf_name: &str, group_len: usize) -> Result<Vec<Vec<u8>>> {
        let handle = self.cf(cf_name)?;
        let mut iter = self.db.raw_iterator_cf(&handle);
        let mut last_keys = Vec::new();

        iter.seek_to_first();
        while let Some(group) = iter.key().and_then(|k| k.get(..group_len)).map(<[u8]>::to_vec) {
            let next = keys::prefix_successor(&group);
            match &next {
                Some(next) => iter.seek_for_prev(next),
                None => iter.seek_to_last(),
            }
            if let Some(key) = iter.key() {
                last_keys.push(key.to_vec());
            }
            match next {
                Some(next) => iter.seek(&next),
                None => break,
            }
        }
        iter.status()?;
        Ok(last_keys)
    }

    /// Newest `created_at` across all mailboxes, read from key bytes only.
    fn latest_signal_at(&self) -> Result<DateTime<Utc>> {
        Ok(self
            .last_key_per_group(cf::SIGNALS, keys::ID_LEN)?
            .iter()
            .filter_map(|key| keys::signal_time_from_key(key))
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    // =========================================================================
    // Index maintenance
    // =========================================================================

    fn index_connection(&self, batch: &mut WriteBatch, connection: &Connection) -> Result<()> {
        let cf_by_owner = self.cf(cf::CONNECTIONS_BY_OWNER)?;
        let cf_by_contact = self.cf(cf::CONNECTIONS_BY_CONTACT)?;
        let cf_by_companion = self.cf(cf::CONNECTIONS_BY_COMPANION)?;

        batch.put_cf(
            &cf_by_owner,
            keys::user_connection_key(&connection.owner_id, &connection.id),
            [],
        );
        batch.put_cf(
            &cf_by_contact,
            keys::contact_connection_key(&connection.companion_contact, &connection.id),
            [],
        );
        if let Some(companion_id) = &connection.companion_id {
            batch.put_cf(
                &cf_by_companion,
                keys::user_connection_key(companion_id, &connection.id),
                [],
            );
        }
        Ok(())
    }

    fn unindex_connection(&self, batch: &mut WriteBatch, connection: &Connection) -> Result<()> {
        let cf_by_owner = self.cf(cf::CONNECTIONS_BY_OWNER)?;
        let cf_by_contact = self.cf(cf::CONNECTIONS_BY_CONTACT)?;
        let cf_by_companion = self.cf(cf::CONNECTIONS_BY_COMPANION)?;

        batch.delete_cf(
            &cf_by_owner,
            keys::user_connection_key(&connection.owner_id, &connection.id),
        );
        batch.delete_cf(
            &cf_by_contact,
            keys::contact_connection_key(&connection.companion_contact, &connection.id),
        );
        if let Some(companion_id) = &connection.companion_id {
            batch.delete_cf(
                &cf_by_companion,
                keys::user_connection_key(companion_id, &connection.id),
            );
        }
        Ok(())
    }

    fn load_connections<F>(&self, entries: Vec<Entry>, extract: F) -> Result<Vec<Connection>>
    where
        F: Fn(&[u8]) -> Option<ConnectionId>,
    {
        let mut connections = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let Some(id) = extract(&key[..]) else { continue };
            if let Some(connection) = self.get_connection(&id)? {
                connections.push(connection);
            }
        }
        Ok(connections)
    }

    fn load_calls<F>(&self, entries: Vec<Entry>, extract: F) -> Result<Vec<Call>>
    where
        F: Fn(&[u8]) -> Option<CallId>,
    {
        let mut calls = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let Some(id) = extract(&key[..]) else { continue };
            if let Some(call) = self.get_call(&id)? {
                calls.push(call);
            }
        }
        Ok(calls)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Connection Operations
    // =========================================================================

    fn insert_connection_if_absent<F>(
        &self,
        connection: &Connection,
        max_open: u32,
        on_known: F,
    ) -> Result<ConnectionInsert>
    where
        F: FnOnce(&mut Connection, UserId),
    {
        let _writer = self.writer.lock();

        let existing = self
            .list_connections_by_contact(&connection.companion_contact)?
            .into_iter()
            .find(|c| c.owner_id == connection.owner_id && c.status != ConnectionStatus::Revoked);
        if let Some(existing) = existing {
            return Ok(ConnectionInsert::Existing(existing));
        }

        let open = self
            .list_connections_by_owner(&connection.owner_id)?
            .iter()
            .filter(|c| c.status.is_open())
            .count();
        if u32::try_from(open).unwrap_or(u32::MAX) >= max_open {
            return Ok(ConnectionInsert::LimitReached);
        }

        let mut connection = connection.clone();
        if let Some(known) = self.get_identity(&connection.companion_contact)? {
            on_known(&mut connection, known);
        }

        let cf_connections = self.cf(cf::CONNECTIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_connections,
            keys::connection_key(&connection.id),
            Self::serialize(&connection)?,
        );
        self.index_connection(&mut batch, &connection)?;
        self.db.write(batch)?;

        Ok(ConnectionInsert::Inserted(connection))
    }

    fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        self.load(cf::CONNECTIONS, &keys::connection_key(id))
    }

    fn modify_connection<F>(&self, id: &ConnectionId, apply: F) -> Result<Conditional<Connection>>
    where
        F: FnOnce(&mut Connection) -> bool,
    {
        let _writer = self.writer.lock();

        let before = self.get_connection(id)?.ok_or(StoreError::NotFound)?;
        let mut after = before.clone();
        if !apply(&mut after) {
            return Ok(Conditional::Unchanged(before));
        }

        let cf_connections = self.cf(cf::CONNECTIONS)?;
        let mut batch = WriteBatch::default();
        // Deletes are applied before the puts, so unchanged index keys survive.
        self.unindex_connection(&mut batch, &before)?;
        self.index_connection(&mut batch, &after)?;
        batch.put_cf(
            &cf_connections,
            keys::connection_key(id),
            Self::serialize(&after)?,
        );
        self.db.write(batch)?;

        Ok(Conditional::Applied(after))
    }

    fn list_connections_by_owner(&self, owner_id: &UserId) -> Result<Vec<Connection>> {
        let entries = self.scan_prefix(cf::CONNECTIONS_BY_OWNER, &keys::user_prefix(owner_id))?;
        self.load_connections(entries, keys::connection_id_from_user_key)
    }

    fn list_connections_by_companion(&self, companion_id: &UserId) -> Result<Vec<Connection>> {
        let entries =
            self.scan_prefix(cf::CONNECTIONS_BY_COMPANION, &keys::user_prefix(companion_id))?;
        self.load_connections(entries, keys::connection_id_from_user_key)
    }

    fn list_connections_by_contact(&self, contact: &ContactAddress) -> Result<Vec<Connection>> {
        let entries = self.scan_prefix(cf::CONNECTIONS_BY_CONTACT, &keys::contact_prefix(contact))?;
        self.load_connections(entries, keys::connection_id_from_contact_key)
    }

    // =========================================================================
    // Identity Operations
    // =========================================================================

    fn bind_identity<F>(
        &self,
        contact: &ContactAddress,
        user_id: &UserId,
        mut activate: F,
    ) -> Result<Vec<Connection>>
    where
        F: FnMut(&mut Connection) -> bool,
    {
        let _writer = self.writer.lock();

        let cf_identities = self.cf(cf::IDENTITIES)?;
        let cf_connections = self.cf(cf::CONNECTIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_identities, keys::identity_key(contact), user_id.as_bytes());

        let mut updated = Vec::new();
        for before in self.list_connections_by_contact(contact)? {
            let mut after = before.clone();
            if !activate(&mut after) {
                continue;
            }
            self.unindex_connection(&mut batch, &before)?;
            self.index_connection(&mut batch, &after)?;
            batch.put_cf(
                &cf_connections,
                keys::connection_key(&after.id),
                Self::serialize(&after)?,
            );
            updated.push(after);
        }
        self.db.write(batch)?;

        Ok(updated)
    }

    fn get_identity(&self, contact: &ContactAddress) -> Result<Option<UserId>> {
        let cf = self.cf(cf::IDENTITIES)?;
        let Some(data) = self.db.get_cf(&cf, keys::identity_key(contact))? else {
            return Ok(None);
        };
        let bytes: [u8; 16] = data
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("malformed identity record".into()))?;
        Ok(Some(UserId::from_bytes(bytes)))
    }

    // =========================================================================
    // Presence Operations
    // =========================================================================

    fn put_presence(&self, record: &PresenceRecord) -> Result<()> {
        let cf = self.cf(cf::PRESENCE)?;
        self.db.put_cf(
            &cf,
            keys::presence_key(&record.user_id),
            Self::serialize(record)?,
        )?;
        Ok(())
    }

    fn get_presence(&self, user_id: &UserId) -> Result<Option<PresenceRecord>> {
        self.load(cf::PRESENCE, &keys::presence_key(user_id))
    }

    // =========================================================================
    // Call Operations
    // =========================================================================

    fn insert_call_if_idle(&self, call: &Call) -> Result<CallInsert> {
        let _writer = self.writer.lock();

        let connected = self
            .list_connections_by_owner(&call.initiator_id)?
            .into_iter()
            .chain(self.list_connections_by_owner(&call.recipient_id)?)
            .any(|c| c.is_active_between(&call.initiator_id, &call.recipient_id));
        if !connected {
            return Ok(CallInsert::NotConnected);
        }

        let conflict = self
            .list_calls_by_participant(&call.initiator_id)?
            .into_iter()
            .find(|c| {
                !c.status.is_terminal()
                    && c.initiator_id == call.initiator_id
                    && c.recipient_id == call.recipient_id
            });
        if let Some(conflict) = conflict {
            return Ok(CallInsert::Conflict(conflict));
        }

        let cf_calls = self.cf(cf::CALLS)?;
        let cf_by_participant = self.cf(cf::CALLS_BY_PARTICIPANT)?;
        let cf_by_status = self.cf(cf::CALLS_BY_STATUS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_calls, keys::call_key(&call.id), Self::serialize(call)?);
        batch.put_cf(
            &cf_by_participant,
            keys::participant_call_key(&call.initiator_id, &call.id),
            [],
        );
        batch.put_cf(
            &cf_by_participant,
            keys::participant_call_key(&call.recipient_id, &call.id),
            [],
        );
        batch.put_cf(
            &cf_by_status,
            keys::status_call_key(call.status.as_u8(), &call.id),
            [],
        );
        self.db.write(batch)?;

        Ok(CallInsert::Inserted(call.clone()))
    }

    fn get_call(&self, id: &CallId) -> Result<Option<Call>> {
        self.load(cf::CALLS, &keys::call_key(id))
    }

    fn modify_call<F>(&self, id: &CallId, apply: F) -> Result<Conditional<Call>>
    where
        F: FnOnce(&mut Call) -> bool,
    {
        let _writer = self.writer.lock();

        let before = self.get_call(id)?.ok_or(StoreError::NotFound)?;
        let mut after = before.clone();
        if !apply(&mut after) {
            return Ok(Conditional::Unchanged(before));
        }

        let cf_calls = self.cf(cf::CALLS)?;
        let cf_by_status = self.cf(cf::CALLS_BY_STATUS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_calls, keys::call_key(id), Self::serialize(&after)?);
        if before.status != after.status {
            batch.delete_cf(&cf_by_status, keys::status_call_key(before.status.as_u8(), id));
            batch.put_cf(
                &cf_by_status,
                keys::status_call_key(after.status.as_u8(), id),
                [],
            );
        }
        self.db.write(batch)?;

        Ok(Conditional::Applied(after))
    }

    fn list_calls_by_participant(&self, user_id: &UserId) -> Result<Vec<Call>> {
        let entries = self.scan_prefix(cf::CALLS_BY_PARTICIPANT, &keys::user_prefix(user_id))?;
        self.load_calls(entries, keys::call_id_from_participant_key)
    }

    fn list_calls_by_status(&self, status: CallStatus) -> Result<Vec<Call>> {
        let entries = self.scan_prefix(cf::CALLS_BY_STATUS, &keys::status_prefix(status.as_u8()))?;
        self.load_calls(entries, keys::call_id_from_status_key)
    }

    // =========================================================================
    // Signaling Operations
    // =========================================================================

    fn append_signal(&self, message: &SignalingMessage) -> Result<SignalAppend> {
        let mut writer = self.writer.lock();

        match self.get_call(&message.call_id)? {
            Some(call) if !call.status.is_terminal() => {}
            _ => return Ok(SignalAppend::CallClosed),
        }

        let floor = writer
            .last_signal_at
            .checked_add_signed(Duration::nanoseconds(1))
            .unwrap_or(writer.last_signal_at);
        let mut stored = message.clone();
        stored.created_at = Utc::now().max(floor);

        let cf_signals = self.cf(cf::SIGNALS)?;
        let cf_by_call = self.cf(cf::SIGNALS_BY_CALL)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_signals,
            keys::mailbox_key(&stored.to_user_id, &stored.created_at, &stored.id),
            Self::serialize(&stored)?,
        );
        batch.put_cf(
            &cf_by_call,
            keys::call_signal_key(&stored.call_id, &stored.created_at, &stored.id),
            stored.to_user_id.as_bytes(),
        );
        self.db.write(batch)?;

        writer.last_signal_at = stored.created_at;
        Ok(SignalAppend::Appended(stored))
    }

    fn list_signals_since(
        &self,
        to_user_id: &UserId,
        since: &DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SignalingMessage>> {
        let handle = self.cf(cf::SIGNALS)?;
        let prefix = keys::user_prefix(to_user_id);
        let start = keys::mailbox_seek_after(to_user_id, since);
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(&start, Direction::Forward));

        let mut messages = Vec::new();
        for item in iter {
            if messages.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let message: SignalingMessage = Self::deserialize(&value)?;
            if message.created_at > *since {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    fn list_calls_with_signals(&self) -> Result<Vec<CallId>> {
        Ok(self
            .last_key_per_group(cf::SIGNALS_BY_CALL, keys::ID_LEN)?
            .iter()
            .filter_map(|key| keys::call_id_from_signal_key(key))
            .collect())
    }

    fn delete_signals_for_call(&self, call_id: &CallId) -> Result<usize> {
        let _writer = self.writer.lock();

        let entries = self.scan_prefix(cf::SIGNALS_BY_CALL, &keys::call_prefix(call_id))?;
        if entries.is_empty() {
            return Ok(0);
        }

        let cf_signals = self.cf(cf::SIGNALS)?;
        let cf_by_call = self.cf(cf::SIGNALS_BY_CALL)?;

        let mut batch = WriteBatch::default();
        for (index_key, to_user) in &entries {
            if let Some(mailbox_key) = keys::mailbox_key_from_call_signal(index_key, to_user) {
                batch.delete_cf(&cf_signals, mailbox_key);
            }
            batch.delete_cf(&cf_by_call, index_key);
        }
        self.db.write(batch)?;

        tracing::debug!(call_id = %call_id, removed = entries.len(), "Dropped call signals");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PresenceStatus, SignalKind};
    use tempfile::TempDir;
    use tether_core::MessageId;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn user(n: u8) -> UserId {
        UserId::from_bytes([n; 16])
    }

    fn create_test_connection(owner: &UserId, contact: &str) -> Connection {
        Connection {
            id: ConnectionId::generate(),
            owner_id: *owner,
            companion_id: None,
            companion_contact: ContactAddress::parse(contact).unwrap(),
            relationship_label: "parent".to_string(),
            display_label: None,
            status: ConnectionStatus::Pending,
            share_availability: true,
            created_at: Utc::now(),
            activated_at: None,
            revoked_at: None,
            blocked_at: None,
        }
    }

    fn create_test_call(from: &UserId, to: &UserId) -> Call {
        Call {
            id: CallId::generate(),
            initiator_id: *from,
            recipient_id: *to,
            status: CallStatus::Ringing,
            created_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            channel_ref: "room".to_string(),
            duration_seconds: None,
        }
    }

    fn create_test_signal(call: &Call, payload: &str) -> SignalingMessage {
        SignalingMessage {
            id: MessageId::generate(),
            call_id: call.id,
            from_user_id: call.initiator_id,
            to_user_id: call.recipient_id,
            kind: SignalKind::Candidate,
            payload: payload.to_string(),
            created_at: Utc::now(),
        }
    }

    fn appended(result: SignalAppend) -> SignalingMessage {
        match result {
            SignalAppend::Appended(message) => message,
            SignalAppend::CallClosed => panic!("expected the signal to be appended"),
        }
    }

    fn connect(store: &RocksStore, owner: u8, companion: u8) -> Connection {
        let mut conn = create_test_connection(&user(owner), &format!("u{companion}@example.com"));
        conn.companion_id = Some(user(companion));
        conn.status = ConnectionStatus::Active;
        conn.activated_at = Some(Utc::now());
        match store.insert_connection_if_absent(&conn, 3, |_, _| {}).unwrap() {
            ConnectionInsert::Inserted(conn) => conn,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn connection_insert_is_idempotent_per_contact() {
        let (store, _dir) = create_test_store();
        let owner = user(1);

        let first = create_test_connection(&owner, "mum@example.com");
        assert!(matches!(
            store.insert_connection_if_absent(&first, 3, |_, _| {}).unwrap(),
            ConnectionInsert::Inserted(_)
        ));

        let again = create_test_connection(&owner, "MUM@example.com");
        match store.insert_connection_if_absent(&again, 3, |_, _| {}).unwrap() {
            ConnectionInsert::Existing(existing) => assert_eq!(existing.id, first.id),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.list_connections_by_owner(&owner).unwrap().len(), 1);

        // A different owner may invite the same contact.
        let other = create_test_connection(&user(2), "mum@example.com");
        assert!(matches!(
            store.insert_connection_if_absent(&other, 3, |_, _| {}).unwrap(),
            ConnectionInsert::Inserted(_)
        ));
        let contact = ContactAddress::parse("mum@example.com").unwrap();
        assert_eq!(store.list_connections_by_contact(&contact).unwrap().len(), 2);
    }

    #[test]
    fn connection_limit_counts_open_connections_only() {
        let (store, _dir) = create_test_store();
        let owner = user(1);

        let first = create_test_connection(&owner, "a@example.com");
        store.insert_connection_if_absent(&first, 2, |_, _| {}).unwrap();
        let second = create_test_connection(&owner, "b@example.com");
        store.insert_connection_if_absent(&second, 2, |_, _| {}).unwrap();

        let third = create_test_connection(&owner, "c@example.com");
        assert_eq!(
            store.insert_connection_if_absent(&third, 2, |_, _| {}).unwrap(),
            ConnectionInsert::LimitReached
        );

        store
            .modify_connection(&first.id, |c| {
                c.status = ConnectionStatus::Revoked;
                true
            })
            .unwrap();
        assert!(matches!(
            store.insert_connection_if_absent(&third, 2, |_, _| {}).unwrap(),
            ConnectionInsert::Inserted(_)
        ));
    }

    #[test]
    fn revoked_connection_frees_the_contact_slot() {
        let (store, _dir) = create_test_store();
        let owner = user(1);
        let first = create_test_connection(&owner, "mum@example.com");
        store.insert_connection_if_absent(&first, 3, |_, _| {}).unwrap();
        store
            .modify_connection(&first.id, |c| {
                c.status = ConnectionStatus::Revoked;
                true
            })
            .unwrap();

        let second = create_test_connection(&owner, "mum@example.com");
        assert!(matches!(
            store.insert_connection_if_absent(&second, 3, |_, _| {}).unwrap(),
            ConnectionInsert::Inserted(_)
        ));
        // The revoked record is kept for audit.
        assert_eq!(store.list_connections_by_owner(&owner).unwrap().len(), 2);
    }

    #[test]
    fn modify_connection_maintains_companion_index() {
        let (store, _dir) = create_test_store();
        let owner = user(1);
        let companion = user(2);
        let conn = create_test_connection(&owner, "mum@example.com");
        store.insert_connection_if_absent(&conn, 3, |_, _| {}).unwrap();
        assert!(store
            .list_connections_by_companion(&companion)
            .unwrap()
            .is_empty());

        let result = store
            .modify_connection(&conn.id, |c| {
                c.companion_id = Some(companion);
                c.status = ConnectionStatus::Active;
                true
            })
            .unwrap();
        assert!(result.is_applied());

        let listed = store.list_connections_by_companion(&companion).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ConnectionStatus::Active);
        assert_eq!(store.list_connections_by_owner(&owner).unwrap().len(), 1);
    }

    #[test]
    fn modify_connection_unchanged_and_missing() {
        let (store, _dir) = create_test_store();
        let conn = create_test_connection(&user(1), "mum@example.com");
        store.insert_connection_if_absent(&conn, 3, |_, _| {}).unwrap();

        let result = store.modify_connection(&conn.id, |_| false).unwrap();
        assert_eq!(result, Conditional::Unchanged(conn));

        let missing = store.modify_connection(&ConnectionId::generate(), |_| true);
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[test]
    fn identity_and_presence_roundtrip() {
        let (store, _dir) = create_test_store();
        let contact = ContactAddress::parse("dad@example.com").unwrap();
        assert!(store.get_identity(&contact).unwrap().is_none());
        assert!(store.bind_identity(&contact, &user(4), |_| true).unwrap().is_empty());
        assert_eq!(store.get_identity(&contact).unwrap(), Some(user(4)));

        let record = PresenceRecord {
            user_id: user(4),
            status: PresenceStatus::Away,
            is_available_for_calls: false,
            last_heartbeat_at: Utc::now(),
            custom_message: Some("Revising".to_string()),
        };
        store.put_presence(&record).unwrap();
        assert_eq!(store.get_presence(&user(4)).unwrap(), Some(record));
        assert!(store.get_presence(&user(5)).unwrap().is_none());
    }

    #[test]
    fn call_insert_conflicts_while_ringing() {
        let (store, _dir) = create_test_store();
        connect(&store, 1, 2);
        let first = create_test_call(&user(1), &user(2));
        store.insert_call_if_idle(&first).unwrap();

        match store
            .insert_call_if_idle(&create_test_call(&user(1), &user(2)))
            .unwrap()
        {
            CallInsert::Conflict(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }

        store
            .modify_call(&first.id, |c| {
                c.status = CallStatus::Missed;
                true
            })
            .unwrap();
        assert!(matches!(
            store
                .insert_call_if_idle(&create_test_call(&user(1), &user(2)))
                .unwrap(),
            CallInsert::Inserted(_)
        ));
    }

    #[test]
    fn call_status_index_follows_updates() {
        let (store, _dir) = create_test_store();
        connect(&store, 1, 2);
        let call = create_test_call(&user(1), &user(2));
        store.insert_call_if_idle(&call).unwrap();
        assert_eq!(store.list_calls_by_status(CallStatus::Ringing).unwrap().len(), 1);

        store
            .modify_call(&call.id, |c| {
                c.status = CallStatus::Accepted;
                true
            })
            .unwrap();
        assert!(store
            .list_calls_by_status(CallStatus::Ringing)
            .unwrap()
            .is_empty());
        assert_eq!(store.list_calls_by_status(CallStatus::Accepted).unwrap().len(), 1);

        // Both participants see the call.
        assert_eq!(store.list_calls_by_participant(&user(1)).unwrap().len(), 1);
        assert_eq!(store.list_calls_by_participant(&user(2)).unwrap().len(), 1);
        assert!(store.list_calls_by_participant(&user(3)).unwrap().is_empty());
    }

    #[test]
    fn concurrent_modify_call_applies_once() {
        let (store, _dir) = create_test_store();
        connect(&store, 1, 2);
        let call = create_test_call(&user(1), &user(2));
        store.insert_call_if_idle(&call).unwrap();

        let applied = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        store
                            .modify_call(&call.id, |c| {
                                if c.status != CallStatus::Ringing {
                                    return false;
                                }
                                c.status = CallStatus::Missed;
                                true
                            })
                            .unwrap()
                            .is_applied()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|applied| *applied)
                .count()
        });
        assert_eq!(applied, 1);
    }

    #[test]
    fn signals_are_ordered_and_cursor_is_exclusive() {
        let (store, _dir) = create_test_store();
        connect(&store, 1, 2);
        let call = create_test_call(&user(1), &user(2));
        store.insert_call_if_idle(&call).unwrap();

        let a = appended(store.append_signal(&create_test_signal(&call, "A")).unwrap());
        let b = appended(store.append_signal(&create_test_signal(&call, "B")).unwrap());
        let c = appended(store.append_signal(&create_test_signal(&call, "C")).unwrap());
        assert!(a.created_at < b.created_at && b.created_at < c.created_at);

        let all = store
            .list_signals_since(&user(2), &DateTime::<Utc>::MIN_UTC, 100)
            .unwrap();
        let payloads: Vec<_> = all.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, ["A", "B", "C"]);

        let after_b = store.list_signals_since(&user(2), &b.created_at, 100).unwrap();
        assert_eq!(after_b.len(), 1);
        assert_eq!(after_b[0].payload, "C");

        let limited = store
            .list_signals_since(&user(2), &DateTime::<Utc>::MIN_UTC, 2)
            .unwrap();
        assert_eq!(limited.len(), 2);

        // The sender's own mailbox is empty.
        assert!(store
            .list_signals_since(&user(1), &DateTime::<Utc>::MIN_UTC, 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn append_refused_for_closed_or_unknown_call() {
        let (store, _dir) = create_test_store();
        let call = create_test_call(&user(1), &user(2));
        assert_eq!(
            store.append_signal(&create_test_signal(&call, "x")).unwrap(),
            SignalAppend::CallClosed
        );

        connect(&store, 1, 2);
        store.insert_call_if_idle(&call).unwrap();
        store
            .modify_call(&call.id, |c| {
                c.status = CallStatus::Declined;
                true
            })
            .unwrap();
        assert_eq!(
            store.append_signal(&create_test_signal(&call, "x")).unwrap(),
            SignalAppend::CallClosed
        );
    }

    #[test]
    fn delete_signals_for_call_only_touches_that_call() {
        let (store, _dir) = create_test_store();
        let first = create_test_call(&user(1), &user(2));
        let second = create_test_call(&user(3), &user(2));
        connect(&store, 1, 2);
        connect(&store, 3, 2);
        store.insert_call_if_idle(&first).unwrap();
        store.insert_call_if_idle(&second).unwrap();

        store.append_signal(&create_test_signal(&first, "1")).unwrap();
        store.append_signal(&create_test_signal(&first, "2")).unwrap();
        store.append_signal(&create_test_signal(&second, "3")).unwrap();

        assert_eq!(store.delete_signals_for_call(&first.id).unwrap(), 2);
        assert_eq!(store.delete_signals_for_call(&first.id).unwrap(), 0);

        let left = store
            .list_signals_since(&user(2), &DateTime::<Utc>::MIN_UTC, 100)
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, "3");
    }

    #[test]
    fn signal_order_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let call = create_test_call(&user(1), &user(2));

        let first = {
            let store = RocksStore::open(dir.path()).unwrap();
            connect(&store, 1, 2);
            store.insert_call_if_idle(&call).unwrap();
            appended(store.append_signal(&create_test_signal(&call, "before")).unwrap())
        };

        let store = RocksStore::open(dir.path()).unwrap();
        let second = appended(store.append_signal(&create_test_signal(&call, "after")).unwrap());
        assert!(second.created_at > first.created_at);
    }

    #[test]
    fn signal_clock_resumes_from_newest_mailbox() {
        let dir = TempDir::new().unwrap();
        let to_two = create_test_call(&user(1), &user(2));
        let to_nine = create_test_call(&user(1), &user(9));

        let newest = {
            let store = RocksStore::open(dir.path()).unwrap();
            connect(&store, 1, 2);
            connect(&store, 1, 9);
            store.insert_call_if_idle(&to_two).unwrap();
            store.insert_call_if_idle(&to_nine).unwrap();
            for payload in ["a", "b"] {
                store.append_signal(&create_test_signal(&to_nine, payload)).unwrap();
            }
            // The lower mailbox holds the newest signal.
            appended(store.append_signal(&create_test_signal(&to_two, "c")).unwrap())
        };

        let store = RocksStore::open(dir.path()).unwrap();
        let next = appended(store.append_signal(&create_test_signal(&to_nine, "d")).unwrap());
        assert!(next.created_at > newest.created_at);
    }

    #[test]
    fn call_insert_requires_active_connection() {
        let (store, _dir) = create_test_store();
        let call = create_test_call(&user(1), &user(2));
        assert_eq!(store.insert_call_if_idle(&call).unwrap(), CallInsert::NotConnected);

        // Either side may own the connection.
        connect(&store, 2, 1);
        assert!(matches!(
            store.insert_call_if_idle(&call).unwrap(),
            CallInsert::Inserted(_)
        ));
    }

    #[test]
    fn call_insert_refused_after_block() {
        let (store, _dir) = create_test_store();
        let conn = connect(&store, 1, 2);
        store
            .modify_connection(&conn.id, |c| {
                c.status = ConnectionStatus::Blocked;
                true
            })
            .unwrap();

        let call = create_test_call(&user(1), &user(2));
        assert_eq!(store.insert_call_if_idle(&call).unwrap(), CallInsert::NotConnected);
        assert!(store.list_calls_by_participant(&user(1)).unwrap().is_empty());
    }

    #[test]
    fn insert_resolves_known_contact() {
        let (store, _dir) = create_test_store();
        let contact = ContactAddress::parse("mum@example.com").unwrap();
        store.bind_identity(&contact, &user(2), |_| false).unwrap();

        let conn = create_test_connection(&user(1), "mum@example.com");
        let inserted = match store
            .insert_connection_if_absent(&conn, 3, |c, known| {
                c.companion_id = Some(known);
                c.status = ConnectionStatus::Active;
            })
            .unwrap()
        {
            ConnectionInsert::Inserted(inserted) => inserted,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(inserted.companion_id, Some(user(2)));
        assert_eq!(inserted.status, ConnectionStatus::Active);
        assert_eq!(store.list_connections_by_companion(&user(2)).unwrap(), vec![inserted]);
    }

    #[test]
    fn bind_identity_updates_selected_connections() {
        let (store, _dir) = create_test_store();
        let contact = ContactAddress::parse("mum@example.com").unwrap();
        let first = create_test_connection(&user(1), "mum@example.com");
        let second = create_test_connection(&user(3), "mum@example.com");
        store.insert_connection_if_absent(&first, 3, |_, _| {}).unwrap();
        store.insert_connection_if_absent(&second, 3, |_, _| {}).unwrap();

        let updated = store
            .bind_identity(&contact, &user(2), |c| {
                if c.owner_id != user(1) {
                    return false;
                }
                c.companion_id = Some(user(2));
                c.status = ConnectionStatus::Active;
                true
            })
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, first.id);

        assert_eq!(store.get_identity(&contact).unwrap(), Some(user(2)));
        let listed = store.list_connections_by_companion(&user(2)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(
            store.get_connection(&second.id).unwrap().map(|c| c.status),
            Some(ConnectionStatus::Pending)
        );
    }

    #[test]
    fn insert_and_bind_race_leaves_nothing_pending() {
        let (store, _dir) = create_test_store();
        let activate = |c: &mut Connection, known: UserId| {
            c.companion_id = Some(known);
            c.status = ConnectionStatus::Active;
        };

        for round in 0..200u32 {
            let contact_str = format!("round{round}@example.com");
            let contact = ContactAddress::parse(&contact_str).unwrap();
            let conn = create_test_connection(&user(1), &contact_str);
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    store.insert_connection_if_absent(&conn, u32::MAX, activate).unwrap();
                });
                scope.spawn(|| {
                    barrier.wait();
                    store
                        .bind_identity(&contact, &user(2), |c| {
                            if c.status != ConnectionStatus::Pending {
                                return false;
                            }
                            activate(c, user(2));
                            true
                        })
                        .unwrap();
                });
            });

            let status = store.get_connection(&conn.id).unwrap().map(|c| c.status);
            assert_eq!(status, Some(ConnectionStatus::Active), "round {round}");
        }
    }

    #[test]
    fn calls_with_signals_lists_each_call_once() {
        let (store, _dir) = create_test_store();
        connect(&store, 1, 2);
        connect(&store, 3, 2);
        let quiet = create_test_call(&user(1), &user(2));
        let busy = create_test_call(&user(3), &user(2));
        store.insert_call_if_idle(&quiet).unwrap();
        store.insert_call_if_idle(&busy).unwrap();
        assert!(store.list_calls_with_signals().unwrap().is_empty());

        for payload in ["1", "2", "3"] {
            store.append_signal(&create_test_signal(&busy, payload)).unwrap();
        }
        assert_eq!(store.list_calls_with_signals().unwrap(), vec![busy.id]);

        store.delete_signals_for_call(&busy.id).unwrap();
        assert!(store.list_calls_with_signals().unwrap().is_empty());
    }
}
