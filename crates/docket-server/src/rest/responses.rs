//! API response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docket_jobs::JobError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Client-facing message for server-side failures; details stay in the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable description.
    pub message: String,
}

/// Application error type for Axum.
#[derive(Debug)]
pub enum AppError {
    /// Request rejected before anything was enqueued.
    BadRequest(String),
    /// Failure from the job engine.
    Job(JobError),
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        Self::Job(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "bad_request".to_string(),
                    message,
                },
            ),
            AppError::Job(err) => {
                error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal_error".to_string(),
                        message: INTERNAL_ERROR_MESSAGE.to_string(),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<T, AppError>;
