//! Connection directory endpoints.
//!
//! This module provides handlers for inviting, listing, revoking and
//! blocking companions, plus self-service identity linking.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_auth::JwtValidator;
use tether_control::{
    CompanionPlane, Connection, ConnectionId, ConnectionStatus, ContactAddress, InviteRequest,
    UserId,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Maximum length of relationship and display labels.
const MAX_LABEL_CHARS: usize = 64;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Which side of a connection the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// The caller issued the invite.
    Owner,
    /// The caller was invited.
    Companion,
}

/// A connection as seen by one of its two sides.
#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    /// Connection ID.
    pub id: ConnectionId,
    /// The caller's side of the connection.
    pub role: ConnectionRole,
    /// The student who issued the invite.
    pub owner_id: UserId,
    /// The companion, once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion_id: Option<UserId>,
    /// The invited contact address.
    pub companion_contact: String,
    /// Relationship label.
    pub relationship_label: String,
    /// Nickname, only shown to the owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_label: Option<String>,
    /// Current status.
    pub status: ConnectionStatus,
    /// Whether the companion may see the owner's availability.
    pub share_availability: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Activation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl ConnectionResponse {
    /// Render a connection for `viewer`.
    #[must_use]
    pub fn for_viewer(connection: Connection, viewer: &UserId) -> Self {
        let role = if connection.owner_id == *viewer {
            ConnectionRole::Owner
        } else {
            ConnectionRole::Companion
        };
        Self {
            id: connection.id,
            role,
            owner_id: connection.owner_id,
            companion_id: connection.companion_id,
            companion_contact: connection.companion_contact.to_string(),
            relationship_label: connection.relationship_label,
            display_label: connection
                .display_label
                .filter(|_| role == ConnectionRole::Owner),
            status: connection.status,
            share_availability: connection.share_availability,
            created_at: connection.created_at,
            activated_at: connection.activated_at,
        }
    }
}

/// Response for connection list.
#[derive(Debug, Serialize)]
pub struct ListConnectionsResponse {
    /// Connections the caller owns or is the companion of.
    pub connections: Vec<ConnectionResponse>,
}

/// Request to invite a companion.
#[derive(Debug, Deserialize)]
pub struct InviteBody {
    /// Contact address of the companion.
    pub contact: String,
    /// Relationship, e.g. "parent".
    pub relationship_label: String,
    /// Optional nickname.
    #[serde(default)]
    pub display_label: Option<String>,
}

/// Request to toggle availability sharing.
#[derive(Debug, Deserialize)]
pub struct SharingBody {
    /// New value of the sharing flag.
    pub share_availability: bool,
}

/// Response for identity linking.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    /// The contact that was linked.
    pub contact: String,
    /// Connections activated by this link.
    pub activated: Vec<ConnectionResponse>,
}

fn validate_label(field: &str, value: &str) -> Result<(), ApiError> {
    let len = value.trim().chars().count();
    if len == 0 || len > MAX_LABEL_CHARS {
        return Err(ApiError::BadRequest(format!(
            "{field} must be 1-{MAX_LABEL_CHARS} characters"
        )));
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// Invite a companion.
///
/// # Errors
///
/// Returns an error if a label is invalid, the contact is malformed, or
/// the caller has reached their connection limit.
pub async fn invite<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<InviteBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    validate_label("relationship_label", &body.relationship_label)?;
    if let Some(display_label) = &body.display_label {
        validate_label("display_label", display_label)?;
    }

    let request = InviteRequest {
        contact: body.contact,
        relationship_label: body.relationship_label,
        display_label: body.display_label,
    };
    let connection = state.control.invite(&user.user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(ConnectionResponse::for_viewer(connection, &user.user_id)),
    ))
}

/// List the caller's connections.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn list_connections<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let connections = state.control.list_connections(&user.user_id).await?;

    Ok(Json(ListConnectionsResponse {
        connections: connections
            .into_iter()
            .map(|c| ConnectionResponse::for_viewer(c, &user.user_id))
            .collect(),
    }))
}

/// Revoke a connection.
///
/// # Errors
///
/// Returns an error if the connection is not found or the caller doesn't own it.
pub async fn revoke<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(connection_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let connection_id = parse_connection_id(&connection_id)?;
    let connection = state.control.revoke(&user.user_id, &connection_id).await?;

    Ok(Json(ConnectionResponse::for_viewer(connection, &user.user_id)))
}

/// Block a connection.
///
/// # Errors
///
/// Returns an error if the connection is not found or the caller doesn't own it.
pub async fn block<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(connection_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let connection_id = parse_connection_id(&connection_id)?;
    let connection = state.control.block(&user.user_id, &connection_id).await?;

    Ok(Json(ConnectionResponse::for_viewer(connection, &user.user_id)))
}

/// Toggle availability sharing on a connection.
///
/// # Errors
///
/// Returns an error if the connection is not found or the caller doesn't own it.
pub async fn set_sharing<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(connection_id): Path<String>,
    Json(body): Json<SharingBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let connection_id = parse_connection_id(&connection_id)?;
    let connection = state
        .control
        .set_availability_sharing(&user.user_id, &connection_id, body.share_availability)
        .await?;

    Ok(Json(ConnectionResponse::for_viewer(connection, &user.user_id)))
}

/// Link the caller's email to their account, activating pending invites.
///
/// # Errors
///
/// Returns `BadRequest` if the token carries no email.
pub async fn link_identity<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let email = user
        .email
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("token carries no email".to_string()))?;
    let contact =
        ContactAddress::parse(email).map_err(|e| ApiError::InvalidContact(e.to_string()))?;

    let activated = state
        .control
        .resolve_on_first_contact(&contact, &user.user_id)
        .await?;

    Ok(Json(LinkResponse {
        contact: contact.to_string(),
        activated: activated
            .into_iter()
            .map(|c| ConnectionResponse::for_viewer(c, &user.user_id))
            .collect(),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_connection_id(s: &str) -> Result<ConnectionId, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid connection ID: {s}")))
}
