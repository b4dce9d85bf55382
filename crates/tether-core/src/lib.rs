//! Value types shared by every tether crate.
//!
//! Ids are UUID newtypes so a `CallId` can never be passed where a
//! `ConnectionId` is expected. [`ContactAddress`] is the normalized
//! (trimmed, lowercased) address an invite is keyed on; two invites to
//! `Mum@Example.com` and `mum@example.com ` collide.
//!
//! ```
//! use tether_core::{CallId, ContactAddress, UserId};
//!
//! let user_id: UserId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
//! let contact = ContactAddress::parse("Mum@Example.com").unwrap();
//! assert_eq!(contact.as_str(), "mum@example.com");
//!
//! let call_id = CallId::generate();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod contact;
pub mod ids;

pub use contact::{ContactAddress, ContactError};
pub use ids::{CallId, ConnectionId, IdError, MessageId, UserId};
