//! Call endpoints.
//!
//! Clients poll `GET /v1/calls/incoming` for ringing calls and
//! `GET /v1/calls/:call_id` for the state of a call they are on.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use tether_auth::JwtValidator;
use tether_control::{CallId, CallView, CompanionPlane, RespondAction, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to place a call.
#[derive(Debug, Deserialize)]
pub struct InitiateBody {
    /// The user to call.
    pub recipient_id: String,
}

/// Request to answer a call.
#[derive(Debug, Deserialize)]
pub struct RespondBody {
    /// `accept` or `decline`.
    pub action: RespondAction,
}

/// Response for call lists.
#[derive(Debug, Serialize)]
pub struct ListCallsResponse {
    /// Calls, oldest first.
    pub calls: Vec<CallView>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Place a call.
///
/// # Errors
///
/// Returns an error if the users are not connected or a call between them
/// is already open.
pub async fn initiate<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<InitiateBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let recipient_id: UserId = body
        .recipient_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user ID: {}", body.recipient_id)))?;

    let call = state.control.initiate(&user.user_id, &recipient_id).await?;

    Ok((StatusCode::CREATED, Json(CallView::from(call))))
}

/// Ringing calls addressed to the caller.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn incoming<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let calls = state.control.incoming_calls(&user.user_id).await?;

    Ok(Json(ListCallsResponse {
        calls: calls.into_iter().map(CallView::from).collect(),
    }))
}

/// Get a call.
///
/// # Errors
///
/// Returns an error if the call is not found or the caller is not on it.
pub async fn get_call<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(call_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let call_id = parse_call_id(&call_id)?;
    let call = state.control.get_call(&call_id, &user.user_id).await?;

    Ok(Json(CallView::from(call)))
}

/// Accept or decline a ringing call.
///
/// # Errors
///
/// Returns an error if the caller is not the recipient or the call is no
/// longer ringing.
pub async fn respond<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(call_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let call_id = parse_call_id(&call_id)?;
    let call = state
        .control
        .respond(&call_id, &user.user_id, body.action)
        .await?;

    Ok(Json(CallView::from(call)))
}

/// Hang up.
///
/// # Errors
///
/// Returns an error if the call is not found or the caller is not on it.
pub async fn end<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(call_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let call_id = parse_call_id(&call_id)?;
    let call = state.control.end(&call_id, &user.user_id).await?;

    Ok(Json(CallView::from(call)))
}

pub(crate) fn parse_call_id(s: &str) -> Result<CallId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid call ID: {s}")))
}
