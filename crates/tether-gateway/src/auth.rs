//! Authentication extractors.
//!
//! `AuthUser` validates the bearer token on public routes. `InternalCaller`
//! guards the internal routes with an optional shared secret.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use tether_auth::{JwtValidator, ValidatedClaims};
use tether_control::CompanionPlane;
use tether_core::UserId;

use crate::error::ApiError;
use crate::state::GatewayState;

/// Header carrying the shared secret on internal routes.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// An authenticated user extracted from a JWT token.
///
/// This extractor validates the `Authorization: Bearer <token>` header
/// and provides access to the user's identity.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user's stable ID (the token's `sub`).
    pub user_id: UserId,
    /// The email on the token, if any.
    pub email: Option<String>,
}

impl AuthUser {
    /// Create an `AuthUser` from validated claims.
    #[must_use]
    pub fn from_claims(claims: &ValidatedClaims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email.clone(),
        }
    }
}

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for AuthUser
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = state.jwt_validator.validate(token).await?;

        Ok(Self::from_claims(&claims))
    }
}

/// A caller allowed on the internal routes.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

/// Compare two secrets without leaking where they differ.
fn secrets_match(given: &str, expected: &str) -> bool {
    // `blake3::Hash` equality is constant-time.
    blake3::hash(given.as_bytes()) == blake3::hash(expected.as_bytes())
}

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for InternalCaller
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.internal_token() else {
            return Ok(Self);
        };

        let given = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        if !secrets_match(given, expected) {
            tracing::warn!("Rejected internal call with wrong token");
            return Err(ApiError::Unauthorized);
        }
        Ok(Self)
    }
}
