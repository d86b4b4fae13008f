//! Error types for the wwf-locations HTTP surface
//!
//! Every error renders as `{"error": {"code": ..., "message": ...}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::pipeline::PipelineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// 404
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 400
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// 429, the locations service throttled us
    #[error("Too many requests: {0}")]
    RateLimited(String),

    /// 503, an upstream is not configured or unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 500
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] wwf_common::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Common(wwf_common::Error::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) | ApiError::Common(wwf_common::Error::InvalidInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code carried in the body
    pub fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::BAD_REQUEST => "BAD_REQUEST",
            StatusCode::TOO_MANY_REQUESTS => "RATE_LIMITED",
            StatusCode::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    fn message(self) -> String {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::RateLimited(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg)
            | ApiError::Common(wwf_common::Error::NotFound(msg))
            | ApiError::Common(wwf_common::Error::InvalidInput(msg)) => msg,
            ApiError::Common(err) => err.to_string(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidInput(msg) => ApiError::BadRequest(msg),
            PipelineError::ServiceUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            PipelineError::RateLimited => {
                ApiError::RateLimited("Please try again in a few moments.".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        if status.is_server_error() {
            tracing::warn!(code, "Request failed: {}", self);
        }

        let body = json!({ "error": { "code": code, "message": self.message() } });
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
