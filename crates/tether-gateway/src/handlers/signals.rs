//! Signaling relay endpoints.
//!
//! Receivers poll `GET /v1/signals` and pass the returned `cursor` back as
//! `since` on the next poll.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_auth::JwtValidator;
use tether_control::{CompanionPlane, SendSignalRequest, SignalingMessage};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::calls::parse_call_id;
use crate::state::GatewayState;

/// Query parameters for receiving signals.
#[derive(Debug, Deserialize)]
pub struct ReceiveQuery {
    /// RFC 3339 cursor; messages strictly newer are returned.
    #[serde(default)]
    pub since: Option<String>,
    /// Restrict to one call.
    #[serde(default)]
    pub call_id: Option<String>,
}

/// Response for received signals.
#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    /// Messages, oldest first.
    pub messages: Vec<SignalingMessage>,
    /// Value to pass as `since` on the next poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<DateTime<Utc>>,
}

/// Relay a signal to the other participant of a call.
///
/// # Errors
///
/// Returns an error if the caller or recipient is not on the call, or the
/// call is closed.
pub async fn send<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(call_id): Path<String>,
    Json(body): Json<SendSignalRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let call_id = parse_call_id(&call_id)?;
    let message = state
        .control
        .send_signal(&call_id, &user.user_id, body)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Signals addressed to the caller.
///
/// # Errors
///
/// Returns `BadRequest` for a malformed cursor or call ID.
pub async fn receive<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Query(query): Query<ReceiveQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let since = query.since.as_deref().map(parse_since).transpose()?;
    let call_id = query.call_id.as_deref().map(parse_call_id).transpose()?;

    let messages = state
        .control
        .receive_since(&user.user_id, since, call_id)
        .await?;
    let cursor = messages.last().map(|m| m.created_at).or(since);

    Ok(Json(ReceiveResponse { messages, cursor }))
}

fn parse_since(s: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("invalid since: {s}")))
}
