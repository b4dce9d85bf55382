//! Connection directory operations.
//!
//! A connection is a directed trust grant from an owner (student) to a
//! companion. It starts `pending` until the companion's identity is known,
//! becomes `active` once resolved, and may later be `revoked` or `blocked`
//! by the owner. Records are never deleted.

use chrono::{DateTime, Utc};
use tether_core::{ConnectionId, ContactAddress, UserId};
use tether_store::{
    Conditional, Connection, ConnectionInsert, ConnectionStatus, Store, StoreError,
};

use crate::authz;
use crate::error::{ControlError, Result};
use crate::types::{ControlConfig, InviteRequest};

fn not_found(id: ConnectionId) -> impl FnOnce(StoreError) -> ControlError {
    move |err| match err {
        StoreError::NotFound => ControlError::ConnectionNotFound(id),
        other => other.into(),
    }
}

fn load<S: Store>(store: &S, id: &ConnectionId) -> Result<Connection> {
    store
        .get_connection(id)?
        .ok_or(ControlError::ConnectionNotFound(*id))
}

/// Bind a pending connection to its companion. Inviting yourself never resolves.
fn activate(connection: &mut Connection, companion_id: UserId, now: DateTime<Utc>) -> bool {
    if connection.status != ConnectionStatus::Pending || connection.owner_id == companion_id {
        return false;
    }
    connection.companion_id = Some(companion_id);
    connection.status = ConnectionStatus::Active;
    connection.activated_at = Some(now);
    true
}

fn clean_label(label: Option<String>) -> Option<String> {
    label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

/// Invite a companion by contact address.
///
/// Idempotent per `(owner, contact)`: if a non-revoked connection exists it
/// is returned unchanged. If the contact already belongs to a known account
/// the new connection is created `active`.
///
/// # Errors
///
/// Returns `InvalidContact` for a malformed address and `ConnectionLimit`
/// when the owner already has the maximum number of open connections.
pub fn invite<S: Store>(
    store: &S,
    config: &ControlConfig,
    owner_id: &UserId,
    request: &InviteRequest,
    now: DateTime<Utc>,
) -> Result<(Connection, bool)> {
    let contact = ContactAddress::parse(&request.contact)?;

    let connection = Connection {
        id: ConnectionId::generate(),
        owner_id: *owner_id,
        companion_id: None,
        companion_contact: contact,
        relationship_label: request.relationship_label.trim().to_string(),
        display_label: clean_label(request.display_label.clone()),
        status: ConnectionStatus::Pending,
        share_availability: true,
        created_at: now,
        activated_at: None,
        revoked_at: None,
        blocked_at: None,
    };

    let inserted = store.insert_connection_if_absent(
        &connection,
        config.max_connections_per_owner,
        |c, companion_id| {
            activate(c, companion_id, now);
        },
    )?;
    match inserted {
        ConnectionInsert::Inserted(connection) => Ok((connection, true)),
        ConnectionInsert::Existing(existing) => Ok((existing, false)),
        ConnectionInsert::LimitReached => Err(ControlError::ConnectionLimit {
            owner: *owner_id,
            limit: config.max_connections_per_owner,
        }),
    }
}

/// Activate every pending connection addressed to `contact`.
///
/// Also records the contact as belonging to `companion_id` so later invites
/// resolve immediately. Both happen in one store write, so an invite racing
/// this call is either activated here or resolved at insert. Safe to call
/// any number of times.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub fn resolve_on_first_contact<S: Store>(
    store: &S,
    contact: &ContactAddress,
    companion_id: &UserId,
    now: DateTime<Utc>,
) -> Result<Vec<Connection>> {
    let activated = store.bind_identity(contact, companion_id, |c| {
        activate(c, *companion_id, now)
    })?;
    Ok(activated)
}

/// Revoke a connection. Revoking a revoked or blocked connection is a no-op.
///
/// # Errors
///
/// Returns `ConnectionNotFound` or `NotOwner`.
pub fn revoke<S: Store>(
    store: &S,
    owner_id: &UserId,
    id: &ConnectionId,
    now: DateTime<Utc>,
) -> Result<Conditional<Connection>> {
    authz::ensure_owner(owner_id, &load(store, id)?)?;

    store
        .modify_connection(id, |c| {
            if !c.status.is_open() {
                return false;
            }
            c.status = ConnectionStatus::Revoked;
            c.revoked_at = Some(now);
            true
        })
        .map_err(not_found(*id))
}

/// Block a connection from any state. Idempotent.
///
/// # Errors
///
/// Returns `ConnectionNotFound` or `NotOwner`.
pub fn block<S: Store>(
    store: &S,
    owner_id: &UserId,
    id: &ConnectionId,
    now: DateTime<Utc>,
) -> Result<Conditional<Connection>> {
    authz::ensure_owner(owner_id, &load(store, id)?)?;

    store
        .modify_connection(id, |c| {
            if c.status == ConnectionStatus::Blocked {
                return false;
            }
            c.status = ConnectionStatus::Blocked;
            c.blocked_at = Some(now);
            true
        })
        .map_err(not_found(*id))
}

/// Choose whether the companion may see the owner's availability flag.
///
/// # Errors
///
/// Returns `ConnectionNotFound` or `NotOwner`.
pub fn set_availability_sharing<S: Store>(
    store: &S,
    owner_id: &UserId,
    id: &ConnectionId,
    share: bool,
) -> Result<Connection> {
    authz::ensure_owner(owner_id, &load(store, id)?)?;

    let result = store
        .modify_connection(id, |c| {
            if c.share_availability == share {
                return false;
            }
            c.share_availability = share;
            true
        })
        .map_err(not_found(*id))?;
    Ok(result.into_inner())
}

/// Connections the user owns plus those in which they are the companion,
/// oldest first.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn list_connections<S: Store>(store: &S, user_id: &UserId) -> Result<Vec<Connection>> {
    let mut connections = store.list_connections_by_owner(user_id)?;
    connections.extend(
        store
            .list_connections_by_companion(user_id)?
            .into_iter()
            .filter(|c| c.owner_id != *user_id),
    );
    connections.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(connections)
}
