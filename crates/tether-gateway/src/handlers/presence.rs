//! Presence endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use tether_auth::JwtValidator;
use tether_control::{CompanionPlane, CompanionPresence, HeartbeatRequest, PresenceStatus, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// The caller's own presence after a heartbeat.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    /// Declared status.
    pub status: PresenceStatus,
    /// Declared availability.
    pub is_available_for_calls: bool,
    /// Server time of the heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Stored status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

/// Presence of one connected user.
#[derive(Debug, Serialize)]
pub struct CompanionPresenceEntry {
    /// The connected user.
    pub user_id: UserId,
    /// What the caller may see.
    #[serde(flatten)]
    pub presence: CompanionPresence,
}

/// Response for presence queries.
#[derive(Debug, Serialize)]
pub struct PresenceListResponse {
    /// One entry per actively connected user.
    pub companions: Vec<CompanionPresenceEntry>,
}

/// Record a heartbeat for the caller.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn heartbeat<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let record = state.control.heartbeat(&user.user_id, body).await?;

    Ok(Json(HeartbeatResponse {
        status: record.status,
        is_available_for_calls: record.is_available_for_calls,
        last_heartbeat_at: record.last_heartbeat_at,
        custom_message: record.custom_message,
    }))
}

/// Presence of everyone actively connected to the caller.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn query<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let presence = state.control.query_for(&user.user_id).await?;

    Ok(Json(PresenceListResponse {
        companions: presence
            .into_iter()
            .map(|(user_id, presence)| CompanionPresenceEntry { user_id, presence })
            .collect(),
    }))
}
