//! Error types for the HTTP surface
//!
//! Cache-layer failures never reach this type; only admin and sample
//! resource handlers return it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::PurgeError;
use crate::models::ErrorResponse;

// == Api Error Enum ==
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or wrong admin credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Purge refused by the safety ceiling
    #[error("Purge over limit: {0}")]
    PurgeOverLimit(String),
}

impl From<PurgeError> for ApiError {
    fn from(err: PurgeError) -> Self {
        ApiError::PurgeOverLimit(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PurgeOverLimit(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

// == Result Type Alias ==
pub type Result<T> = std::result::Result<T, ApiError>;
