//! Authentication server error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Request-level failures, rendered as HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request body was unusable.
    #[error("bad request: {reason}")]
    BadRequest {
        /// What was wrong.
        reason: String,
    },

    /// The identity is not allowed to authenticate.
    #[error("identity not allowed: {identity}")]
    Forbidden {
        /// Rejected identity.
        identity: String,
    },

    /// Missing, malformed or unknown bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Token minting failed.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the failure.
        reason: String,
    },
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Server lifecycle failures.
#[derive(Debug, Error)]
pub enum AuthServerError {
    /// Binding the listener failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serving connections failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
