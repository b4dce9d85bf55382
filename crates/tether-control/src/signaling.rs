//! Signaling relay.
//!
//! A store-and-forward mailbox per user, scoped to one call. Payloads are
//! opaque. Readers poll with the `created_at` of the last message they saw.

use chrono::{DateTime, Utc};
use tether_core::{CallId, MessageId, UserId};
use tether_store::{SignalAppend, SignalingMessage, Store};

use crate::authz;
use crate::error::{ControlError, Result};
use crate::types::{ControlConfig, SendSignalRequest};

/// Relay a message from `from_user_id` to the other participant of a call.
///
/// The stored `created_at` is assigned by the store and strictly increases
/// across messages.
///
/// # Errors
///
/// Returns `NotParticipant` unless sender and recipient are exactly the
/// call's two participants, and `CallClosed` once the call is terminal.
pub fn send<S: Store>(
    store: &S,
    call_id: &CallId,
    from_user_id: &UserId,
    request: &SendSignalRequest,
    now: DateTime<Utc>,
) -> Result<SignalingMessage> {
    let call = store
        .get_call(call_id)?
        .ok_or(ControlError::CallNotFound(*call_id))?;

    authz::ensure_participant(from_user_id, &call)?;
    if call.peer_of(from_user_id) != Some(request.to_user_id) {
        tracing::warn!(
            call_id = %call_id,
            from_user_id = %from_user_id,
            to_user_id = %request.to_user_id,
            "Rejected signal to non-participant"
        );
        return Err(ControlError::NotParticipant {
            user_id: request.to_user_id,
            call_id: *call_id,
        });
    }
    if call.status.is_terminal() {
        return Err(ControlError::CallClosed(*call_id));
    }

    let message = SignalingMessage {
        id: MessageId::generate(),
        call_id: *call_id,
        from_user_id: *from_user_id,
        to_user_id: request.to_user_id,
        kind: request.kind,
        payload: request.payload.clone(),
        created_at: now,
    };

    // The call may have closed since it was read; the store re-checks.
    match store.append_signal(&message)? {
        SignalAppend::Appended(message) => Ok(message),
        SignalAppend::CallClosed => Err(ControlError::CallClosed(*call_id)),
    }
}

/// Messages addressed to `user_id` with `created_at > since`, oldest first.
///
/// At most `max_signal_batch` messages are returned; callers page by
/// passing the last `created_at` back as `since`. Only the addressee can
/// ever read a message. With `call_id` set, the result is narrowed to that
/// call, which the user must be a participant of.
///
/// # Errors
///
/// Returns `CallNotFound` or `NotParticipant` for a bad call filter.
pub fn receive_since<S: Store>(
    store: &S,
    config: &ControlConfig,
    user_id: &UserId,
    since: Option<DateTime<Utc>>,
    call_id: Option<&CallId>,
) -> Result<Vec<SignalingMessage>> {
    let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let limit = config.max_signal_batch;

    let Some(call_id) = call_id else {
        return Ok(store.list_signals_since(user_id, &since, limit)?);
    };

    let call = store
        .get_call(call_id)?
        .ok_or(ControlError::CallNotFound(*call_id))?;
    authz::ensure_participant(user_id, &call)?;

    // Scan the whole mailbox tail so a busy other call can't starve the cursor.
    Ok(store
        .list_signals_since(user_id, &since, usize::MAX)?
        .into_iter()
        .filter(|m| m.call_id == *call_id)
        .take(limit)
        .collect())
}
