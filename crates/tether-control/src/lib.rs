//! Control plane for tether companion presence and calls.
//!
//! This crate holds the business logic that lets a student and the people
//! they trust see each other's presence and start calls. Everything runs
//! on top of the storage layer's conditional primitives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Gateway (HTTP)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CompanionService                        │
//! │  ┌────────────┐ ┌──────────┐ ┌──────────┐ ┌─────────────┐  │
//! │  │ Connection │ │ Presence │ │  Call    │ │  Signaling  │  │
//! │  │ Directory  │ │ Tracker  │ │  Coord.  │ │  Relay      │  │
//! │  └────────────┘ └──────────┘ └──────────┘ └─────────────┘  │
//! │            authz predicates · call state machine            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                       ┌──────────────┐
//!                       │    Store     │
//!                       │  (RocksDB)   │
//!                       └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_control::{CompanionPlane, CompanionService, InviteRequest};
//! use tether_store::RocksStore;
//! use tether_core::UserId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/tether")?);
//! let control = CompanionService::with_defaults(store);
//!
//! let student = UserId::generate();
//! let request = InviteRequest::new("mom@example.com", "parent");
//! let connection = control.invite(&student, request).await?;
//!
//! println!("Invited: {} ({:?})", connection.id, connection.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Call State Machine
//!
//! - `Ringing` → `Accepted` (recipient accepts)
//! - `Ringing` → `Declined` (recipient declines)
//! - `Ringing` → `Missed` (either side ends, or the ring timeout passes)
//! - `Accepted` → `Ended` (either side ends)
//!
//! `Declined`, `Missed` and `Ended` are terminal. See [`lifecycle`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod authz;
pub mod calls;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod retry;
pub mod service;
pub mod signaling;
pub mod sweep;
pub mod types;

pub use error::{ControlError, Result};
pub use lifecycle::CallAction;
pub use retry::RetryPolicy;
pub use service::{CompanionPlane, CompanionService};
pub use types::{
    CallView, CompanionPresence, ControlConfig, HeartbeatRequest, InviteRequest, RespondAction,
    SendSignalRequest, SweepReport,
};

// Re-export commonly used types from dependencies for convenience
pub use tether_core::{CallId, ConnectionId, ContactAddress, MessageId, UserId};
pub use tether_store::{
    Call, CallStatus, Connection, ConnectionStatus, PresenceRecord, PresenceStatus, SignalKind,
    SignalingMessage,
};
