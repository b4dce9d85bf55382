//! JWT validation and claims extraction.
//!
//! This module provides the core JWT validation logic, including signature
//! verification and claims validation.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use tether_core::UserId;

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// Validated claims extracted from a JWT.
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    /// The user ID extracted from the `sub` claim.
    pub user_id: UserId,
    /// The account email, used to resolve pending invites.
    pub email: Option<String>,
    /// The provider-assigned role, if any.
    pub role: Option<String>,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Trait for validating JWTs.
#[async_trait]
pub trait JwtValidator: Send + Sync {
    /// Validate a JWT and extract claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is invalid, expired, or cannot be validated.
    async fn validate(&self, token: &str) -> Result<ValidatedClaims>;
}

/// Raw claims from a JWT before validation.
#[derive(Debug, Deserialize)]
struct RawClaims {
    /// Subject (user ID as UUID string)
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    /// Expiration timestamp
    exp: u64,
}

/// HS256 validator for tokens signed with the provider's shared secret.
pub struct HmacValidator {
    key: DecodingKey,
    validation: Validation,
}

impl HmacValidator {
    /// Create a validator from the auth configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Misconfigured` if the signing secret is empty.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Misconfigured("jwt secret is empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.as_str()]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        Ok(Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        })
    }
}

#[async_trait]
impl JwtValidator for HmacValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let token_data = decode::<RawClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidIssuer => AuthError::ClaimMismatch { claim: "iss" },
                ErrorKind::InvalidAudience => AuthError::ClaimMismatch { claim: "aud" },
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
                _ => AuthError::Malformed(e.to_string()),
            })
            .inspect_err(|e| tracing::debug!(error = %e, "Token rejected"))?;

        let claims = token_data.claims;

        let user_id =
            UserId::from_str(&claims.sub).map_err(|_| AuthError::InvalidSubject(claims.sub.clone()))?;

        let exp_secs = i64::try_from(claims.exp).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(exp_secs, 0)
            .ok_or_else(|| AuthError::Malformed("invalid exp timestamp".to_string()))?;

        // Phone-only and anonymous accounts carry an empty email.
        let email = claims.email.filter(|email| !email.is_empty());

        Ok(ValidatedClaims {
            user_id,
            email,
            role: claims.role,
            expires_at,
        })
    }
}

/// A mock JWT validator for testing.
///
/// Accepts tokens of the form `test-token:<user_uuid>` or
/// `test-token:<user_uuid>:<email>`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockJwtValidator;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl JwtValidator for MockJwtValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
        let rest = token.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::Malformed("expected test-token:<user>[:<email>]".to_string())
        })?;

        let (user, email) = match rest.split_once(':') {
            Some((user, email)) => (user, Some(email.to_string())),
            None => (rest, None),
        };

        let user_id =
            UserId::from_str(user).map_err(|_| AuthError::InvalidSubject(user.to_string()))?;

        Ok(ValidatedClaims {
            user_id,
            email,
            role: Some("authenticated".to_string()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
