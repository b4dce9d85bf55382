//! Internal API endpoints.
//!
//! These endpoints are used by the auth boundary and by an external
//! scheduler. They don't take end-user JWTs; when `internal_token` is
//! configured every call must carry it in `x-internal-token`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use tether_auth::JwtValidator;
use tether_control::{CompanionPlane, ConnectionId, ContactAddress, UserId};

use crate::auth::InternalCaller;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for binding a contact to an account.
#[derive(Debug, Deserialize)]
pub struct IdentityBody {
    /// Contact address the user signed in with.
    pub contact: String,
    /// The user's ID.
    pub user_id: String,
}

/// Response for identity binding.
#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    /// Normalized contact.
    pub contact: String,
    /// Connections activated by this call.
    pub activated: Vec<ConnectionId>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Bind a contact to an account after its first authentication.
///
/// Safe to call on every sign-in.
///
/// # Errors
///
/// Returns an error if the contact or user ID is malformed.
pub async fn register_identity<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _caller: InternalCaller,
    Json(body): Json<IdentityBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let contact = ContactAddress::parse(&body.contact)
        .map_err(|e| ApiError::InvalidContact(e.to_string()))?;
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user ID: {}", body.user_id)))?;

    let activated = state
        .control
        .resolve_on_first_contact(&contact, &user_id)
        .await?;

    tracing::info!(
        user_id = %user_id,
        activated = activated.len(),
        "Registered identity from auth boundary"
    );

    Ok(Json(IdentityResponse {
        contact: contact.to_string(),
        activated: activated.into_iter().map(|c| c.id).collect(),
    }))
}

/// Run one maintenance sweep: expire ringing calls and collect old signals.
///
/// # Errors
///
/// Returns an error if the store is unavailable.
pub async fn sweep<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _caller: InternalCaller,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let report = state.control.sweep().await?;

    tracing::info!(
        expired_calls = report.expired_calls,
        signals_removed = report.signals_removed,
        "Sweep triggered externally"
    );

    Ok(Json(report))
}
