//! Periodic maintenance: ring timeouts and signal garbage collection.

use chrono::{DateTime, Utc};
use tether_store::{Call, CallStatus, Store};

use crate::calls;
use crate::error::Result;
use crate::types::ControlConfig;

/// Move every ringing call older than the ring timeout to `missed`.
///
/// Uses the same conditional update as `end`, so a call answered while the
/// sweep runs is left alone. Returns the calls that were expired.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub fn expire_ringing_calls<S: Store>(
    store: &S,
    config: &ControlConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Call>> {
    let cutoff = now - config.ring_timeout();
    let mut expired = Vec::new();

    for call in store.list_calls_by_status(CallStatus::Ringing)? {
        if call.created_at > cutoff {
            continue;
        }
        let result = calls::expire(store, &call.id, cutoff, now)?;
        if result.is_applied() {
            let call = result.into_inner();
            tracing::info!(call_id = %call.id, "Ringing call expired");
            expired.push(call);
        }
    }

    Ok(expired)
}

/// Delete the signals of calls that have been terminal longer than the grace period.
///
/// Only calls that still hold signals are visited, so already collected
/// history costs nothing. Signals of a call record that no longer exists
/// are dropped outright. Returns the number of messages removed.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub fn collect_signals<S: Store>(
    store: &S,
    config: &ControlConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    let cutoff = now - config.signal_grace();
    let mut removed = 0;

    for call_id in store.list_calls_with_signals()? {
        let collectable = match store.get_call(&call_id)? {
            Some(call) => {
                call.status.is_terminal() && call.ended_at.is_some_and(|ended| ended <= cutoff)
            }
            None => true,
        };
        if collectable {
            removed += store.delete_signals_for_call(&call_id)?;
        }
    }

    if removed > 0 {
        tracing::debug!(removed, "Collected signals of closed calls");
    }
    Ok(removed)
}
