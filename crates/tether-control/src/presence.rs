//! Presence tracking.
//!
//! Presence is push-on-write, pull-on-read: clients heartbeat on an interval
//! and viewers re-query. Every read derives `offline` for records whose last
//! heartbeat is older than the staleness threshold.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tether_core::UserId;
use tether_store::{PresenceRecord, PresenceStatus, Store};

use crate::authz::{self, Visibility};
use crate::error::Result;
use crate::types::{CompanionPresence, ControlConfig, HeartbeatRequest};

/// Maximum length of a custom status line, in characters.
pub const MAX_CUSTOM_MESSAGE_CHARS: usize = 140;

fn clean_message(message: Option<&str>) -> Option<String> {
    let trimmed = message?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_CUSTOM_MESSAGE_CHARS).collect())
}

/// Record a heartbeat for `user_id`, overwriting the previous record.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub fn heartbeat<S: Store>(
    store: &S,
    user_id: &UserId,
    request: &HeartbeatRequest,
    now: DateTime<Utc>,
) -> Result<PresenceRecord> {
    let record = PresenceRecord {
        user_id: *user_id,
        status: request.status,
        is_available_for_calls: request.is_available,
        last_heartbeat_at: now,
        custom_message: clean_message(request.custom_message.as_deref()),
    };
    store.put_presence(&record)?;
    Ok(record)
}

/// Returns true if the record is too old to be trusted.
#[must_use]
pub fn is_stale(record: &PresenceRecord, config: &ControlConfig, now: DateTime<Utc>) -> bool {
    now - record.last_heartbeat_at > config.staleness_threshold()
}

/// Derive what a viewer sees from a stored record.
#[must_use]
pub fn derive(
    record: Option<&PresenceRecord>,
    visibility: Visibility,
    config: &ControlConfig,
    now: DateTime<Utc>,
) -> CompanionPresence {
    let Some(record) = record else {
        return CompanionPresence::unknown();
    };

    let status = if is_stale(record, config, now) {
        PresenceStatus::Offline
    } else {
        record.status
    };
    let online = status != PresenceStatus::Offline;

    CompanionPresence {
        status,
        is_available_for_calls: online && visibility.availability && record.is_available_for_calls,
        last_seen_at: Some(record.last_heartbeat_at),
        custom_message: if online {
            record.custom_message.clone()
        } else {
            None
        },
    }
}

/// Presence of every user with an active connection to `viewer_id`.
///
/// Users without such a connection never appear in the result.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn query_for<S: Store>(
    store: &S,
    config: &ControlConfig,
    viewer_id: &UserId,
    now: DateTime<Utc>,
) -> Result<BTreeMap<UserId, CompanionPresence>> {
    let mut presence = BTreeMap::new();
    for (user_id, visibility) in authz::visible_counterparts(store, viewer_id)? {
        let record = store.get_presence(&user_id)?;
        presence.insert(user_id, derive(record.as_ref(), visibility, config, now));
    }
    Ok(presence)
}
