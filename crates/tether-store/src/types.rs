//! Domain types stored in the database.
//!
//! These types represent the persisted state of connections, presence,
//! calls and signaling messages, plus the outcomes of the store's atomic
//! conditional operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{CallId, ConnectionId, ContactAddress, MessageId, UserId};

/// A directed trust grant from an owner (student) to a companion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique identifier for the connection.
    pub id: ConnectionId,
    /// The student who issued the invite.
    pub owner_id: UserId,
    /// The companion's identity, once resolved.
    pub companion_id: Option<UserId>,
    /// The address the invite was sent to.
    pub companion_contact: ContactAddress,
    /// Relationship as described by the owner (e.g. "parent").
    pub relationship_label: String,
    /// Optional nickname shown in the owner's UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_label: Option<String>,
    /// Current lifecycle state.
    pub status: ConnectionStatus,
    /// Whether the companion may see the owner's availability flag.
    #[serde(default = "default_share_availability")]
    pub share_availability: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the connection became active.
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    /// When the connection was revoked.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    /// When the connection was blocked.
    #[serde(default)]
    pub blocked_at: Option<DateTime<Utc>>,
}

const fn default_share_availability() -> bool {
    true
}

impl Connection {
    /// Returns true if this connection links `a` and `b` (in either role) and is active.
    #[must_use]
    pub fn is_active_between(&self, a: &UserId, b: &UserId) -> bool {
        if self.status != ConnectionStatus::Active {
            return false;
        }
        match self.companion_id {
            Some(companion) => {
                (self.owner_id == *a && companion == *b) || (self.owner_id == *b && companion == *a)
            }
            None => false,
        }
    }

    /// Returns the user on the other side of the connection from `user_id`.
    #[must_use]
    pub fn counterpart(&self, user_id: &UserId) -> Option<UserId> {
        if self.owner_id == *user_id {
            self.companion_id
        } else if self.companion_id == Some(*user_id) {
            Some(self.owner_id)
        } else {
            None
        }
    }
}

/// Lifecycle states for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Invite sent, companion has not signed in yet.
    Pending = 1,
    /// Companion identity resolved; presence and calls allowed.
    Active = 2,
    /// Withdrawn by the owner. Kept for audit.
    Revoked = 3,
    /// Blocked by the owner or by a trust and safety action.
    Blocked = 4,
}

impl ConnectionStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for statuses that occupy the `(owner, contact)` slot
    /// and count against the owner's connection limit.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

/// Self-declared presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Active in the app.
    #[default]
    Online,
    /// App open but idle or hidden.
    Away,
    /// Signed off.
    Offline,
}

/// The last known presence of one user. Overwritten on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// The user this record describes.
    pub user_id: UserId,
    /// Declared status at the last heartbeat.
    pub status: PresenceStatus,
    /// Whether the user is willing to take calls.
    pub is_available_for_calls: bool,
    /// Time of the last heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Optional status line, e.g. "Studying Contract Law".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

/// States of a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CallStatus {
    /// Waiting for the recipient to answer.
    Ringing = 1,
    /// Recipient accepted; media setup may proceed.
    Accepted = 2,
    /// Recipient declined.
    Declined = 3,
    /// Accepted call finished.
    Ended = 4,
    /// Ended or timed out before anyone answered.
    Missed = 5,
}

impl CallStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `CallStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ringing),
            2 => Some(Self::Accepted),
            3 => Some(Self::Declined),
            4 => Some(Self::Ended),
            5 => Some(Self::Missed),
            _ => None,
        }
    }

    /// Returns true once the call can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Ended | Self::Missed)
    }
}

/// One call attempt between two connected users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Unique identifier for the call.
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
    /// When the call reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Opaque room identifier handed to the media layer.
    pub channel_ref: String,
    /// Talk time, set once on `accepted -> ended`.
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

impl Call {
    /// Returns true if `user_id` is the initiator or the recipient.
    #[must_use]
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.initiator_id == *user_id || self.recipient_id == *user_id
    }

    /// Returns the other participant, or `None` if `user_id` is not on the call.
    #[must_use]
    pub fn peer_of(&self, user_id: &UserId) -> Option<UserId> {
        if self.initiator_id == *user_id {
            Some(self.recipient_id)
        } else if self.recipient_id == *user_id {
            Some(self.initiator_id)
        } else {
            None
        }
    }
}

/// Kind of negotiation payload carried by a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Network candidate.
    Candidate,
    /// Peer is leaving the media session.
    Hangup,
}

/// An envelope relayed between the two participants of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    /// Unique identifier for the message.
    pub id: MessageId,
    /// The call that scopes this message.
    pub call_id: CallId,
    /// Sender.
    pub from_user_id: UserId,
    /// Recipient; the only user allowed to read the message.
    pub to_user_id: UserId,
    /// Payload kind.
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Opaque payload, never inspected by the relay.
    pub payload: String,
    /// Enqueue time. Strictly increasing across the store.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a compare-and-set update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional<T> {
    /// The update applied; holds the new record.
    Applied(T),
    /// The precondition did not hold; holds the current record, unchanged.
    Unchanged(T),
}

impl<T> Conditional<T> {
    /// Returns the record regardless of whether the update applied.
    pub fn into_inner(self) -> T {
        match self {
            Self::Applied(value) | Self::Unchanged(value) => value,
        }
    }

    /// Returns true if the update applied.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Outcome of an idempotent connection insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionInsert {
    /// A new record was written.
    Inserted(Connection),
    /// A non-revoked record for the same `(owner, contact)` already exists.
    Existing(Connection),
    /// The owner already has the maximum number of open connections.
    LimitReached,
}

/// Outcome of a guarded call insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInsert {
    /// The call was written.
    Inserted(Call),
    /// A non-terminal call already exists for the same ordered pair.
    Conflict(Call),
    /// No active connection links the two participants.
    NotConnected,
}

/// Outcome of a signaling append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalAppend {
    /// The message was enqueued with the returned `created_at`.
    Appended(SignalingMessage),
    /// The scoping call is terminal or missing; nothing was enqueued.
    CallClosed,
}
