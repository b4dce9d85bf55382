//! API error types and responses.
//!
//! This module defines the standard error format for all API responses:
//! `{"error": {"code": "...", "message": "..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use tether_auth::AuthError;
use tether_control::ControlError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid authentication token.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller may not perform this action.
    #[error("{message}")]
    Forbidden {
        /// Machine-readable reason.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state.
    #[error("{message}")]
    Conflict {
        /// Machine-readable reason.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The contact address could not be parsed.
    #[error("invalid contact: {0}")]
    InvalidContact(String),

    /// The store is temporarily unavailable.
    #[error("service unavailable")]
    Unavailable,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidContact(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden { code, .. } | Self::Conflict { code, .. } => *code,
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidContact(_) => "invalid_contact",
            Self::Unavailable => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_client_fault() {
            tracing::debug!(error = %err, refresh = err.needs_refresh(), "Rejected token");
            Self::Unauthorized
        } else {
            tracing::error!(error = %err, "Token validator unusable");
            Self::Internal("authentication service error".to_string())
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let code = err.code();
        match err {
            ControlError::ConnectionNotFound(id) => Self::NotFound(format!("connection {id}")),
            ControlError::CallNotFound(id) => Self::NotFound(format!("call {id}")),
            ControlError::NotOwner { .. }
            | ControlError::NotParticipant { .. }
            | ControlError::NotRecipient { .. }
            | ControlError::CallClosed(_)
            | ControlError::NotConnected { .. } => Self::Forbidden {
                code,
                message: err.to_string(),
            },
            ControlError::InvalidTransition { .. }
            | ControlError::CallInProgress { .. }
            | ControlError::ConnectionLimit { .. } => Self::Conflict {
                code,
                message: err.to_string(),
            },
            ControlError::InvalidContact(contact_err) => {
                Self::InvalidContact(contact_err.to_string())
            }
            ControlError::Unavailable(msg) => {
                tracing::error!(error = %msg, "Store unavailable");
                Self::Unavailable
            }
            ControlError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store error");
                Self::Internal("storage error".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_control::{CallAction, CallId, CallStatus, UserId};

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn control_statuses_match_control_layer() {
        let call_id = CallId::generate();
        let user = UserId::generate();
        let errors = vec![
            ControlError::CallNotFound(call_id),
            ControlError::NotRecipient { user_id: user, call_id },
            ControlError::CallClosed(call_id),
            ControlError::NotConnected {
                initiator: user,
                recipient: UserId::generate(),
            },
            ControlError::CallInProgress { call_id },
            ControlError::ConnectionLimit { owner: user, limit: 3 },
            ControlError::Unavailable("busy".into()),
        ];

        for err in errors {
            let expected = err.http_status_code();
            assert_eq!(ApiError::from(err).status_code().as_u16(), expected);
        }
    }

    #[test]
    fn control_errors_keep_their_codes() {
        let call_id = CallId::generate();
        let user_id = UserId::generate();

        let err = ApiError::from(ControlError::NotConnected {
            initiator: user_id,
            recipient: UserId::generate(),
        });
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "not_connected");

        let err = ApiError::from(ControlError::InvalidTransition {
            call_id,
            from: CallStatus::Ended,
            action: CallAction::Accept,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "invalid_transition");

        let err = ApiError::from(ControlError::NotParticipant { user_id, call_id });
        assert_eq!(err.code(), "forbidden");

        let err = ApiError::from(ControlError::Unavailable("busy".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_errors_are_unauthorized() {
        assert_eq!(
            ApiError::from(AuthError::TokenExpired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::Misconfigured("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
