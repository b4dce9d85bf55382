//! JWT authentication for tether.
//!
//! Access tokens are issued by the hosted auth provider and signed with a
//! shared HMAC secret (HS256). This crate validates them and extracts the
//! caller's [`UserId`](tether_core::UserId) and, when present, their email.
//!
//! # Example
//!
//! ```no_run
//! use tether_auth::{AuthConfig, HmacValidator, JwtValidator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::new("super-secret-signing-key");
//! let validator = HmacValidator::new(&config)?;
//!
//! // In a request handler:
//! let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...";
//! let claims = validator.validate(token).await?;
//!
//! println!("User ID: {}", claims.user_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod jwt;

pub use error::{AuthError, Result};
pub use jwt::{HmacValidator, JwtValidator, ValidatedClaims};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockJwtValidator;

/// Default audience of access tokens issued to signed-in users.
pub const DEFAULT_AUDIENCE: &str = "authenticated";

/// Configuration for validating access tokens.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared HS256 signing secret.
    pub jwt_secret: String,
    /// Expected JWT audience (`aud` claim).
    pub audience: String,
    /// Expected JWT issuer, if it should be checked.
    pub issuer: Option<String>,
}

impl AuthConfig {
    /// Create a configuration with the default audience and no issuer check.
    #[must_use]
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            audience: DEFAULT_AUDIENCE.to_string(),
            issuer: None,
        }
    }
}
