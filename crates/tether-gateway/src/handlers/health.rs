//! Liveness probes.
//!
//! `GET /health` is public and says nothing about configuration.
//! `GET /internal/health` additionally reports how maintenance is scheduled
//! so operators can tell whether an external sweeper is expected.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use tether_auth::JwtValidator;
use tether_control::CompanionPlane;

use crate::auth::InternalCaller;
use crate::state::GatewayState;

const SERVICE: &str = "tether-gateway";

/// Body of the public liveness probe.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"ok"` when the process answers.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
}

impl Liveness {
    const fn ok() -> Self {
        Self {
            status: "ok",
            service: SERVICE,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Who runs the maintenance sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// A timer inside the gateway.
    InProcess,
    /// Something outside calls `POST /internal/v1/sweep`.
    External,
}

/// Body of the internal probe.
#[derive(Debug, Serialize)]
pub struct InternalLiveness {
    #[serde(flatten)]
    liveness: Liveness,
    /// Sweep scheduling.
    pub sweep: SweepMode,
    /// Seconds between in-process sweeps, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_seconds: Option<u64>,
    /// Whether internal routes require `x-internal-token`.
    pub internal_token_required: bool,
}

/// `GET /health`.
pub async fn health() -> impl IntoResponse {
    Json(Liveness::ok())
}

/// `GET /internal/health`.
pub async fn internal_health<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _caller: InternalCaller,
) -> impl IntoResponse
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let interval = state.config.sweep_interval();
    Json(InternalLiveness {
        liveness: Liveness::ok(),
        sweep: if interval.is_some() {
            SweepMode::InProcess
        } else {
            SweepMode::External
        },
        sweep_interval_seconds: interval.map(|d| d.as_secs()),
        internal_token_required: state.internal_token().is_some(),
    })
}
