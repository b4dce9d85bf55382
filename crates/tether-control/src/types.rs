//! Request and response types for control plane operations.
//!
//! These types define the API contracts for connections, presence, calls
//! and signaling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{CallId, UserId};
use tether_store::{Call, CallStatus, PresenceStatus, SignalKind};

use crate::lifecycle::CallAction;
use crate::retry::RetryPolicy;

/// Request to invite a companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRequest {
    /// Contact address of the companion (validated and normalized).
    pub contact: String,
    /// How the owner describes the relationship, e.g. "parent".
    pub relationship_label: String,
    /// Optional nickname shown in the owner's UI.
    #[serde(default)]
    pub display_label: Option<String>,
}

impl InviteRequest {
    /// Create a new request without a display label.
    #[must_use]
    pub fn new(contact: impl Into<String>, relationship_label: impl Into<String>) -> Self {
        Self {
            contact: contact.into(),
            relationship_label: relationship_label.into(),
            display_label: None,
        }
    }
}

/// A presence update sent by the client on a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Declared status; `offline` signs the user off explicitly.
    #[serde(default)]
    pub status: PresenceStatus,
    /// Whether the user is willing to take calls.
    pub is_available: bool,
    /// Optional status line.
    #[serde(default)]
    pub custom_message: Option<String>,
}

impl HeartbeatRequest {
    /// An `online` heartbeat with the given availability.
    #[must_use]
    pub const fn online(is_available: bool) -> Self {
        Self {
            status: PresenceStatus::Online,
            is_available,
            custom_message: None,
        }
    }
}

/// The recipient's answer to a ringing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespondAction {
    /// Pick up.
    Accept,
    /// Refuse.
    Decline,
}

impl From<RespondAction> for CallAction {
    fn from(action: RespondAction) -> Self {
        match action {
            RespondAction::Accept => Self::Accept,
            RespondAction::Decline => Self::Decline,
        }
    }
}

/// A signaling envelope to relay to the other participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSignalRequest {
    /// The recipient; must be the sender's peer on the call.
    pub to_user_id: UserId,
    /// Payload kind.
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Opaque payload.
    pub payload: String,
}

/// What a viewer sees about one connected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionPresence {
    /// Derived status; `offline` when the last heartbeat is stale.
    pub status: PresenceStatus,
    /// Availability, reported `false` when the viewer may not see it.
    pub is_available_for_calls: bool,
    /// Time of the last heartbeat, if any was ever received.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Status line, hidden while offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

impl CompanionPresence {
    /// Presence of a user who never sent a heartbeat.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: PresenceStatus::Offline,
            is_available_for_calls: false,
            last_seen_at: None,
            custom_message: None,
        }
    }
}

/// A call as shown to one of its participants.
///
/// The media room reference is only revealed while the call is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallView {
    /// Call ID.
    pub id: CallId,
    /// The user who placed the call.
    pub initiator_id: UserId,
    /// The user being called.
    pub recipient_id: UserId,
    /// Current status.
    pub status: CallStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the recipient accepted.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the call became terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Talk time for ended calls.
    pub duration_seconds: Option<i64>,
    /// Media room reference, present only while accepted.
    pub channel_ref: Option<String>,
}

impl From<Call> for CallView {
    fn from(call: Call) -> Self {
        let channel_ref = (call.status == CallStatus::Accepted).then_some(call.channel_ref);
        Self {
            id: call.id,
            initiator_id: call.initiator_id,
            recipient_id: call.recipient_id,
            status: call.status,
            created_at: call.created_at,
            accepted_at: call.accepted_at,
            ended_at: call.ended_at,
            duration_seconds: call.duration_seconds,
            channel_ref,
        }
    }
}

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Ringing calls moved to `missed`.
    pub expired_calls: usize,
    /// Signaling messages garbage-collected.
    pub signals_removed: usize,
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Heartbeats older than this are read as offline (seconds).
    pub staleness_threshold_seconds: i64,
    /// Ringing calls older than this are expired by the sweep (seconds).
    pub ring_timeout_seconds: i64,
    /// How long a terminal call's signals are kept (seconds).
    pub signal_grace_seconds: i64,
    /// Maximum pending or active connections per owner.
    pub max_connections_per_owner: u32,
    /// Maximum messages returned by one receive.
    pub max_signal_batch: usize,
    /// Retry policy for transient store faults.
    pub retry: RetryPolicy,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_seconds: 120,
            ring_timeout_seconds: 45,
            signal_grace_seconds: 300,
            max_connections_per_owner: 3,
            max_signal_batch: 256,
            retry: RetryPolicy::default(),
        }
    }
}

impl ControlConfig {
    /// The staleness threshold as a duration.
    #[must_use]
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_seconds)
    }

    /// The ring timeout as a duration.
    #[must_use]
    pub fn ring_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ring_timeout_seconds)
    }

    /// The signal grace period as a duration.
    #[must_use]
    pub fn signal_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signal_grace_seconds)
    }
}
