//! HTTP error types for `secman` server.
//!
//! Maps domain errors from `secman-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use secman_core::error::{AuthError, BarrierError, CoreError, EngineError, RouterError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The barrier is sealed.
    Sealed,
    /// Neither the root token nor the auth chain accepted the request.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// A conflict (e.g., already initialized, already unsealed).
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Sealed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "sealed",
                "secman is sealed".to_owned(),
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidShareEncoding { .. } => Self::BadRequest(err.to_string()),
            CoreError::Barrier(inner) => inner.into(),
            CoreError::Router(inner) => inner.into(),
            CoreError::Engine(inner) => inner.into(),
            CoreError::Auth(inner) => inner.into(),
        }
    }
}

impl From<BarrierError> for AppError {
    fn from(err: BarrierError) -> Self {
        match err {
            BarrierError::Sealed => Self::Sealed,
            BarrierError::NotFound { .. } => Self::NotFound(err.to_string()),
            BarrierError::AlreadyInitialized | BarrierError::AlreadyUnsealed => {
                Self::Conflict(err.to_string())
            }
            BarrierError::NotInitialized
            | BarrierError::InvalidConfig { .. }
            | BarrierError::InvalidShare { .. }
            | BarrierError::RecoveryFailed { .. }
            | BarrierError::InvalidPath { .. } => Self::BadRequest(err.to_string()),
            BarrierError::UnknownKey { .. }
            | BarrierError::Crypto { .. }
            | BarrierError::Keyring(_)
            | BarrierError::Storage { .. }
            | BarrierError::Malformed { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<RouterError> for AppError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::EngineNotFound { .. } => Self::NotFound(err.to_string()),
            RouterError::EngineAlreadyRegistered { .. } => Self::Conflict(err.to_string()),
            RouterError::InvalidPath { .. } | RouterError::FieldCountMismatch { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotEnabled { .. } => Self::NotFound(err.to_string()),
            EngineError::InvalidRequest { .. } => Self::BadRequest(err.to_string()),
            EngineError::Barrier(inner) => inner.into(),
            EngineError::Router(inner) => inner.into(),
            EngineError::MissingBody | EngineError::Internal { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => Self::Unauthorized(err.to_string()),
            AuthError::NotAuthorizer { .. } => Self::BadRequest(err.to_string()),
            AuthError::Engine(inner) => inner.into(),
            AuthError::Router(inner) => inner.into(),
            AuthError::Barrier(inner) => inner.into(),
            AuthError::Serialization { .. } => Self::Internal(err.to_string()),
        }
    }
}
