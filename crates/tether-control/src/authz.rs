//! Capability checks shared by every operation.
//!
//! All "who may see or mutate what" decisions go through the predicates in
//! this module so the no-cross-user-leakage rule lives in one place.

use std::collections::BTreeMap;

use tether_core::UserId;
use tether_store::{Call, Connection, Store};

use crate::error::{ControlError, Result};

/// What a viewer may see about one of their connected users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// Whether the availability flag may be shown.
    pub availability: bool,
}

/// Returns true iff an active connection links `a` and `b`, in either direction.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn is_active_between<S: Store>(store: &S, a: &UserId, b: &UserId) -> Result<bool> {
    if a == b {
        return Ok(false);
    }
    let linked = store
        .list_connections_by_owner(a)?
        .iter()
        .chain(store.list_connections_by_owner(b)?.iter())
        .any(|c| c.is_active_between(a, b));
    Ok(linked)
}

/// Returns true if `viewer` may see the availability flag of the other side of `connection`.
///
/// Owners always see their companions' availability; companions see the
/// owner's only while the owner shares it.
#[must_use]
pub fn can_view_availability(viewer: &UserId, connection: &Connection) -> bool {
    connection.owner_id == *viewer || connection.share_availability
}

/// Every user with an active connection to `viewer`, with what the viewer may see.
///
/// When two connections link the same pair, the most permissive one wins.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn visible_counterparts<S: Store>(
    store: &S,
    viewer: &UserId,
) -> Result<BTreeMap<UserId, Visibility>> {
    let mut visible: BTreeMap<UserId, Visibility> = BTreeMap::new();

    let owned = store.list_connections_by_owner(viewer)?;
    let as_companion = store.list_connections_by_companion(viewer)?;

    for connection in owned.iter().chain(as_companion.iter()) {
        let Some(other) = connection.counterpart(viewer) else {
            continue;
        };
        if !connection.is_active_between(viewer, &other) {
            continue;
        }
        let availability = can_view_availability(viewer, connection);
        visible
            .entry(other)
            .and_modify(|v| v.availability |= availability)
            .or_insert(Visibility { availability });
    }

    Ok(visible)
}

/// Fail with `NotOwner` unless `user_id` owns the connection.
///
/// # Errors
///
/// Returns `ControlError::NotOwner` for anyone but the owner.
pub fn ensure_owner(user_id: &UserId, connection: &Connection) -> Result<()> {
    if connection.owner_id != *user_id {
        tracing::warn!(
            user_id = %user_id,
            connection_id = %connection.id,
            "Rejected connection mutation by non-owner"
        );
        return Err(ControlError::NotOwner {
            user_id: *user_id,
            connection_id: connection.id,
        });
    }
    Ok(())
}

/// Fail with `NotParticipant` unless `user_id` is on the call.
///
/// # Errors
///
/// Returns `ControlError::NotParticipant` for anyone else.
pub fn ensure_participant(user_id: &UserId, call: &Call) -> Result<()> {
    if !call.is_participant(user_id) {
        tracing::warn!(user_id = %user_id, call_id = %call.id, "Rejected access by non-participant");
        return Err(ControlError::NotParticipant {
            user_id: *user_id,
            call_id: call.id,
        });
    }
    Ok(())
}

/// Fail unless `user_id` is the call's recipient.
///
/// # Errors
///
/// Returns `ControlError::NotParticipant` for outsiders and
/// `ControlError::NotRecipient` for the initiator.
pub fn ensure_recipient(user_id: &UserId, call: &Call) -> Result<()> {
    ensure_participant(user_id, call)?;
    if call.recipient_id != *user_id {
        return Err(ControlError::NotRecipient {
            user_id: *user_id,
            call_id: call.id,
        });
    }
    Ok(())
}
