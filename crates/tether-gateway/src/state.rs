//! State shared by every handler.

use std::sync::Arc;

use tether_auth::JwtValidator;
use tether_control::CompanionPlane;

use crate::config::GatewayConfig;

/// Everything a request needs beyond its own extractors.
///
/// The router wraps this in an `Arc`, so the fields are cloned only once
/// at startup.
pub struct GatewayState<C: CompanionPlane, V: JwtValidator> {
    /// Directory, presence, calls and signaling.
    pub control: Arc<C>,
    /// Verifies bearer tokens on `/v1` routes.
    pub jwt_validator: Arc<V>,
    /// Listener, limits and internal-route settings.
    pub config: GatewayConfig,
}

impl<C: CompanionPlane, V: JwtValidator> GatewayState<C, V> {
    /// Bundle the control plane, token validator and config.
    #[must_use]
    pub fn new(control: Arc<C>, jwt_validator: Arc<V>, config: GatewayConfig) -> Self {
        Self {
            control,
            jwt_validator,
            config,
        }
    }

    /// The shared secret internal routes expect, if one is configured.
    #[must_use]
    pub fn internal_token(&self) -> Option<&str> {
        self.config.internal_token.as_deref()
    }
}
