//! Call coordination.
//!
//! Every transition is a compare-and-set on the call's current status, run
//! through [`Store::modify_call`]. Two racing writers can never both move
//! the same call, and a terminal call is never reopened.

use chrono::{DateTime, Utc};
use tether_core::{CallId, UserId};
use tether_store::{Call, CallInsert, CallStatus, Conditional, Store, StoreError};

use crate::authz;
use crate::error::{ControlError, Result};
use crate::lifecycle::{self, CallAction};
use crate::types::RespondAction;

fn not_found(id: CallId) -> impl FnOnce(StoreError) -> ControlError {
    move |err| match err {
        StoreError::NotFound => ControlError::CallNotFound(id),
        other => other.into(),
    }
}

fn load<S: Store>(store: &S, id: &CallId) -> Result<Call> {
    store.get_call(id)?.ok_or(ControlError::CallNotFound(*id))
}

/// Derive an opaque media room reference for a new call.
#[must_use]
pub fn channel_ref(id: &CallId, initiator: &UserId, recipient: &UserId, now: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(id.as_bytes());
    hasher.update(initiator.as_bytes());
    hasher.update(recipient.as_bytes());
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    let hex = hasher.finalize().to_hex();
    format!("tether-{}", &hex[..32])
}

/// Place a call from `initiator_id` to `recipient_id`.
///
/// The connection is checked under the same store lock that inserts the
/// call, so a revoke or block that lands first always wins.
///
/// # Errors
///
/// Returns `NotConnected` without an active connection between the two and
/// `CallInProgress` while an earlier call between them is still open.
pub fn initiate<S: Store>(
    store: &S,
    initiator_id: &UserId,
    recipient_id: &UserId,
    now: DateTime<Utc>,
) -> Result<Call> {
    let id = CallId::generate();
    let call = Call {
        id,
        initiator_id: *initiator_id,
        recipient_id: *recipient_id,
        status: CallStatus::Ringing,
        created_at: now,
        accepted_at: None,
        ended_at: None,
        channel_ref: channel_ref(&id, initiator_id, recipient_id, now),
        duration_seconds: None,
    };

    match store.insert_call_if_idle(&call)? {
        CallInsert::Inserted(call) => Ok(call),
        CallInsert::Conflict(existing) => Err(ControlError::CallInProgress {
            call_id: existing.id,
        }),
        CallInsert::NotConnected => {
            tracing::warn!(
                initiator_id = %initiator_id,
                recipient_id = %recipient_id,
                "Rejected call between unconnected users"
            );
            Err(ControlError::NotConnected {
                initiator: *initiator_id,
                recipient: *recipient_id,
            })
        }
    }
}

/// Accept or decline a ringing call. Only the recipient may answer.
///
/// # Errors
///
/// Returns a forbidden-family error for anyone but the recipient and
/// `InvalidTransition` unless the call is ringing.
pub fn respond<S: Store>(
    store: &S,
    call_id: &CallId,
    responder_id: &UserId,
    action: RespondAction,
    now: DateTime<Utc>,
) -> Result<Call> {
    authz::ensure_recipient(responder_id, &load(store, call_id)?)?;

    let action = CallAction::from(action);
    let result = store
        .modify_call(call_id, |call| lifecycle::apply(call, action, now))
        .map_err(not_found(*call_id))?;

    match result {
        Conditional::Applied(call) => Ok(call),
        Conditional::Unchanged(call) => Err(ControlError::InvalidTransition {
            call_id: *call_id,
            from: call.status,
            action,
        }),
    }
}

/// Hang up. Either participant may end a call at any time.
///
/// Ringing calls become `missed`, accepted calls `ended`. Ending a terminal
/// call succeeds without changing it.
///
/// # Errors
///
/// Returns `NotParticipant` for anyone else.
pub fn end<S: Store>(
    store: &S,
    call_id: &CallId,
    actor_id: &UserId,
    now: DateTime<Utc>,
) -> Result<Conditional<Call>> {
    authz::ensure_participant(actor_id, &load(store, call_id)?)?;

    store
        .modify_call(call_id, |call| lifecycle::apply(call, CallAction::End, now))
        .map_err(not_found(*call_id))
}

/// Move a ringing call created at or before `cutoff` to `missed`.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub fn expire<S: Store>(
    store: &S,
    call_id: &CallId,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Conditional<Call>> {
    store
        .modify_call(call_id, |call| {
            call.created_at <= cutoff && lifecycle::apply(call, CallAction::Expire, now)
        })
        .map_err(not_found(*call_id))
}

/// Get a call as one of its participants.
///
/// # Errors
///
/// Returns `CallNotFound` or `NotParticipant`.
pub fn get_call<S: Store>(store: &S, call_id: &CallId, user_id: &UserId) -> Result<Call> {
    let call = load(store, call_id)?;
    authz::ensure_participant(user_id, &call)?;
    Ok(call)
}

/// Ringing calls addressed to `user_id`, oldest first.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn incoming_calls<S: Store>(store: &S, user_id: &UserId) -> Result<Vec<Call>> {
    let mut calls: Vec<Call> = store
        .list_calls_by_participant(user_id)?
        .into_iter()
        .filter(|c| c.recipient_id == *user_id && c.status == CallStatus::Ringing)
        .collect();
    calls.sort_by_key(|c| c.created_at);
    Ok(calls)
}
