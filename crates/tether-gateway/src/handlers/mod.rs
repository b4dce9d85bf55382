//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod calls;
pub mod connections;
pub mod health;
pub mod internal;
pub mod presence;
pub mod signals;
