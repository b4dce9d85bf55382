//! Call lifecycle state machine.
//!
//! This module defines the valid call transitions and applies them to a
//! record, keeping the timestamps and the talk time consistent.
//!
//! # State Machine
//!
//! ```text
//!                 ┌───────────┐
//!                 │  Ringing  │
//!                 └─────┬─────┘
//!        accept         │ decline        end / expire
//!     ┌─────────────────┼──────────────────────┐
//!     ▼                 ▼                      ▼
//! ┌──────────┐    ┌──────────┐           ┌──────────┐
//! │ Accepted │    │ Declined │           │  Missed  │
//! └────┬─────┘    └──────────┘           └──────────┘
//!      │ end
//!      ▼
//! ┌──────────┐
//! │  Ended   │
//! └──────────┘
//! ```
//!
//! `Declined`, `Ended` and `Missed` are terminal and never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_store::{Call, CallStatus};

/// Something that can happen to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    /// The recipient picks up.
    Accept,
    /// The recipient refuses.
    Decline,
    /// Either participant hangs up.
    End,
    /// The ring timeout elapsed.
    Expire,
}

/// Returns the state reached by applying `action` in state `from`, if allowed.
#[must_use]
pub const fn next_status(from: CallStatus, action: CallAction) -> Option<CallStatus> {
    use CallAction::{Accept, Decline, End, Expire};
    use CallStatus::{Accepted, Declined, Ended, Missed, Ringing};

    match (from, action) {
        (Ringing, Accept) => Some(Accepted),
        (Ringing, Decline) => Some(Declined),
        (Ringing, End | Expire) => Some(Missed),
        (Accepted, End) => Some(Ended),
        _ => None,
    }
}

/// Apply `action` to `call` at time `now`.
///
/// Returns `false` and leaves the call untouched if the action is not
/// allowed in its current state, so the function can be used directly as a
/// compare-and-set closure.
pub fn apply(call: &mut Call, action: CallAction, now: DateTime<Utc>) -> bool {
    let Some(target) = next_status(call.status, action) else {
        return false;
    };

    call.status = target;
    match target {
        CallStatus::Accepted => call.accepted_at = Some(now),
        CallStatus::Ended => {
            call.ended_at = Some(now);
            call.duration_seconds = call
                .accepted_at
                .map(|accepted_at| (now - accepted_at).num_seconds().max(0));
        }
        CallStatus::Declined | CallStatus::Missed => call.ended_at = Some(now),
        CallStatus::Ringing => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{CallId, UserId};

    const ALL_STATES: [CallStatus; 5] = [
        CallStatus::Ringing,
        CallStatus::Accepted,
        CallStatus::Declined,
        CallStatus::Ended,
        CallStatus::Missed,
    ];

    const ALL_ACTIONS: [CallAction; 4] = [
        CallAction::Accept,
        CallAction::Decline,
        CallAction::End,
        CallAction::Expire,
    ];

    fn ringing_call() -> Call {
        Call {
            id: CallId::generate(),
            initiator_id: UserId::from_bytes([1u8; 16]),
            recipient_id: UserId::from_bytes([2u8; 16]),
            status: CallStatus::Ringing,
            created_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            channel_ref: "room".to_string(),
            duration_seconds: None,
        }
    }

    #[test]
    fn valid_transitions() {
        use CallAction::*;
        use CallStatus::*;

        assert_eq!(next_status(Ringing, Accept), Some(Accepted));
        assert_eq!(next_status(Ringing, Decline), Some(Declined));
        assert_eq!(next_status(Ringing, End), Some(Missed));
        assert_eq!(next_status(Ringing, Expire), Some(Missed));
        assert_eq!(next_status(Accepted, End), Some(Ended));
    }

    #[test]
    fn every_other_pair_is_rejected() {
        let allowed = [
            (CallStatus::Ringing, CallAction::Accept),
            (CallStatus::Ringing, CallAction::Decline),
            (CallStatus::Ringing, CallAction::End),
            (CallStatus::Ringing, CallAction::Expire),
            (CallStatus::Accepted, CallAction::End),
        ];
        for from in ALL_STATES {
            for action in ALL_ACTIONS {
                let allowed_here = allowed.contains(&(from, action));
                assert_eq!(
                    next_status(from, action).is_some(),
                    allowed_here,
                    "{from:?} + {action:?}"
                );
            }
        }
    }

    #[test]
    fn accepted_cannot_become_missed() {
        assert!(next_status(CallStatus::Accepted, CallAction::Expire).is_none());
        assert!(next_status(CallStatus::Accepted, CallAction::Decline).is_none());
    }

    #[test]
    fn terminal_states_have_no_actions() {
        for status in ALL_STATES {
            let stuck = ALL_ACTIONS
                .iter()
                .all(|action| next_status(status, *action).is_none());
            assert_eq!(status.is_terminal(), stuck);
        }
    }

    #[test]
    fn apply_sets_timestamps() {
        let mut call = ringing_call();
        let accepted_at = Utc::now();
        assert!(apply(&mut call, CallAction::Accept, accepted_at));
        assert_eq!(call.accepted_at, Some(accepted_at));
        assert!(call.ended_at.is_none());

        let ended_at = accepted_at + chrono::Duration::seconds(95);
        assert!(apply(&mut call, CallAction::End, ended_at));
        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.ended_at, Some(ended_at));
        assert_eq!(call.duration_seconds, Some(95));
    }

    #[test]
    fn apply_rejects_without_mutating() {
        let mut call = ringing_call();
        let now = Utc::now();
        assert!(apply(&mut call, CallAction::Decline, now));
        let declined = call.clone();

        assert!(!apply(&mut call, CallAction::Accept, now));
        assert!(!apply(&mut call, CallAction::End, now));
        assert_eq!(call, declined);
    }

    #[test]
    fn missed_call_has_no_duration() {
        let mut call = ringing_call();
        assert!(apply(&mut call, CallAction::End, Utc::now()));
        assert_eq!(call.status, CallStatus::Missed);
        assert!(call.accepted_at.is_none());
        assert!(call.duration_seconds.is_none());
    }
}
