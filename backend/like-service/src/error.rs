//! Error types for like-service
//!
//! Request-path errors render as `{"error": ..., "status": ...}` JSON.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::cache::CacheError;
use crate::repository::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Video not found: {0}")]
    VideoNotFound(i64),

    /// Cache unreachable or timed out; nothing was mutated or published
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    #[error("Database error: {0}")]
    Database(#[from] StoreError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UserNotFound(_) | ServiceError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
