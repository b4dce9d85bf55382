//! Error types for the control plane.
//!
//! Every failure a caller can see is one of the variants below. Policy
//! failures (authorization, state machine, conflicts) are final; only
//! transient store faults are retried, and they surface as `Unavailable`
//! once retries are exhausted.

use tether_core::{CallId, ConnectionId, ContactError, UserId};
use tether_store::{CallStatus, StoreError};
use thiserror::Error;

use crate::lifecycle::CallAction;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested connection was not found.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The requested call was not found.
    #[error("call not found: {0}")]
    CallNotFound(CallId),

    /// The user does not own the connection.
    #[error("user {user_id} is not the owner of connection {connection_id}")]
    NotOwner {
        /// The user making the request.
        user_id: UserId,
        /// The connection being accessed.
        connection_id: ConnectionId,
    },

    /// The user is not one of the call's two participants.
    #[error("user {user_id} is not a participant of call {call_id}")]
    NotParticipant {
        /// The user making the request.
        user_id: UserId,
        /// The call being accessed.
        call_id: CallId,
    },

    /// Only the recipient may answer a call.
    #[error("user {user_id} is not the recipient of call {call_id}")]
    NotRecipient {
        /// The user making the request.
        user_id: UserId,
        /// The call being answered.
        call_id: CallId,
    },

    /// The call is terminal; no more signals are accepted.
    #[error("call {0} is closed")]
    CallClosed(CallId),

    /// The call state machine rejected the requested move.
    #[error("cannot {action:?} call {call_id} in state {from:?}")]
    InvalidTransition {
        /// The call being transitioned.
        call_id: CallId,
        /// The current state.
        from: CallStatus,
        /// The requested action.
        action: CallAction,
    },

    /// No active connection links the two users.
    #[error("users {initiator} and {recipient} are not connected")]
    NotConnected {
        /// The user placing the call.
        initiator: UserId,
        /// The user being called.
        recipient: UserId,
    },

    /// A non-terminal call already exists for this pair.
    #[error("call {call_id} is already in progress")]
    CallInProgress {
        /// The existing call.
        call_id: CallId,
    },

    /// The invite target is not a valid contact address.
    #[error("invalid contact: {0}")]
    InvalidContact(#[from] ContactError),

    /// The owner already has the maximum number of open connections.
    #[error("user {owner} already has {limit} connections")]
    ConnectionLimit {
        /// The inviting owner.
        owner: UserId,
        /// The configured maximum.
        limit: u32,
    },

    /// The store stayed unavailable after all retries.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ControlError {
    /// Returns the stable error code exposed to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotOwner { .. }
            | Self::NotParticipant { .. }
            | Self::NotRecipient { .. }
            | Self::CallClosed(_) => "forbidden",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotConnected { .. } => "not_connected",
            Self::CallInProgress { .. } => "call_in_progress",
            Self::InvalidContact(_) => "invalid_contact",
            Self::ConnectionNotFound(_) | Self::CallNotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::ConnectionLimit { .. } => "connection_limit",
            Self::Store(_) => "internal",
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotOwner { .. }
            | Self::NotParticipant { .. }
            | Self::NotRecipient { .. }
            | Self::CallClosed(_)
            | Self::NotConnected { .. } => 403,
            Self::InvalidTransition { .. }
            | Self::CallInProgress { .. }
            | Self::ConnectionLimit { .. } => 409,
            Self::InvalidContact(_) => 422,
            Self::ConnectionNotFound(_) | Self::CallNotFound(_) => 404,
            Self::Unavailable(_) => 503,
            Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let user_id = UserId::from_bytes([1u8; 16]);
        let call_id = CallId::from_bytes([2u8; 16]);
        let connection_id = ConnectionId::from_bytes([3u8; 16]);

        assert_eq!(
            ControlError::ConnectionNotFound(connection_id).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::NotOwner {
                user_id,
                connection_id
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            ControlError::InvalidTransition {
                call_id,
                from: CallStatus::Declined,
                action: CallAction::Accept,
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::InvalidContact(ContactError::MissingAt).http_status_code(),
            422
        );
        assert_eq!(
            ControlError::Unavailable("busy".into()).http_status_code(),
            503
        );
    }

    #[test]
    fn forbidden_family_shares_a_code() {
        let user_id = UserId::from_bytes([1u8; 16]);
        let call_id = CallId::from_bytes([2u8; 16]);

        for err in [
            ControlError::NotParticipant { user_id, call_id },
            ControlError::NotRecipient { user_id, call_id },
            ControlError::CallClosed(call_id),
        ] {
            assert_eq!(err.code(), "forbidden");
            assert_eq!(err.http_status_code(), 403);
        }
        assert_eq!(
            ControlError::NotConnected {
                initiator: user_id,
                recipient: user_id
            }
            .code(),
            "not_connected"
        );
    }

    #[test]
    fn store_faults_are_the_internal_errors() {
        let err = ControlError::from(StoreError::Database("disk".into()));
        assert_eq!(err.code(), "internal");
        assert_eq!(err.http_status_code(), 500);
    }
}
