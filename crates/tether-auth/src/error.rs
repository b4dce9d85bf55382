//! Token validation errors.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Why a bearer token was not accepted.
///
/// Everything except [`AuthError::Misconfigured`] is the caller's problem
/// and surfaces as 401; the gateway never tells the client which check
/// failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// `exp` is in the past. The app should refresh its session.
    #[error("token expired")]
    TokenExpired,

    /// The HS256 signature does not match the shared secret.
    #[error("invalid signature")]
    InvalidSignature,

    /// `aud` or `iss` is not the configured value.
    #[error("unexpected {claim}")]
    ClaimMismatch {
        /// Name of the claim that did not match.
        claim: &'static str,
    },

    /// `sub` is not a user UUID, e.g. a service-role token.
    #[error("subject is not a user id: {0}")]
    InvalidSubject(String),

    /// A claim the validator requires is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// The token could not be decoded at all.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The validator itself cannot work, e.g. an empty secret.
    #[error("validator misconfigured: {0}")]
    Misconfigured(String),
}

impl AuthError {
    /// Whether the token, rather than the server, is at fault.
    #[must_use]
    pub const fn is_client_fault(&self) -> bool {
        !matches!(self, Self::Misconfigured(_))
    }

    /// Whether signing in again would fix it.
    #[must_use]
    pub const fn needs_refresh(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}
