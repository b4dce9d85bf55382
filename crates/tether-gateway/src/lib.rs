//! HTTP surface for tether presence and companion calls.
//!
//! Clients poll; there are no sockets. Every `/v1` request carries a bearer
//! token which [`AuthUser`] turns into a `UserId` before any handler runs.
//! Handlers are thin: parse ids and bodies, call the [`CompanionPlane`]
//! held in [`GatewayState`], and map [`ApiError`] to a JSON envelope.
//!
//! ```text
//!   client ──► TraceLayer ─► CORS ─► body limit ─► timeout ─► handler
//!                                                              │
//!                              AuthUser / InternalCaller ◄─────┤
//!                                                              ▼
//!                                                     CompanionPlane
//!                                                        (RocksDB)
//! ```
//!
//! The binary also runs the maintenance sweep on a timer unless
//! `SWEEP_INTERVAL_SECONDS=0`, in which case `POST /internal/v1/sweep`
//! must be driven from outside.
//!
//! [`CompanionPlane`]: tether_control::CompanionPlane
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_gateway::{create_router, GatewayConfig, GatewayState};
//! use tether_control::CompanionService;
//! use tether_auth::{AuthConfig, HmacValidator};
//! use tether_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/tether")?);
//! let control = Arc::new(CompanionService::with_defaults(store));
//! let jwt_validator = Arc::new(HmacValidator::new(&AuthConfig::new("secret"))?);
//!
//! let state = GatewayState::new(control, jwt_validator, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::{AuthUser, InternalCaller};
pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
