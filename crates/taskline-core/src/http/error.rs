use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::domain::{ErrorKind, TaskError};

/// Stable error codes.
///
/// Clients match on `code` from `{"code": "NOT_FOUND", "message": "..."}`;
/// messages may be reworded.
pub mod error_code {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DISPATCH_FAILED: &str = "DISPATCH_FAILED";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Path, body or query string could not be decoded. HTTP 422.
    #[error("invalid request: {0}")]
    Request(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Request(_) | ApiError::Task(TaskError::Validation(_)) => {
                error_code::VALIDATION_FAILED
            }
            ApiError::Task(TaskError::InvalidTransition { .. }) => error_code::INVALID_TRANSITION,
            ApiError::Task(TaskError::NotFound(_)) => error_code::NOT_FOUND,
            ApiError::Task(TaskError::Conflict { .. }) => error_code::CONFLICT,
            ApiError::Task(TaskError::Dispatch { .. }) => error_code::DISPATCH_FAILED,
            ApiError::Task(TaskError::Storage(_)) => error_code::STORAGE_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Request(_)
            | ApiError::Task(TaskError::Validation(_))
            | ApiError::Task(TaskError::InvalidTransition { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Task(TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Task(TaskError::Conflict { .. }) => StatusCode::CONFLICT,
            ApiError::Task(TaskError::Dispatch { .. } | TaskError::Storage(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let ApiError::Task(e) = &self
            && e.kind() == ErrorKind::Infrastructure
        {
            tracing::error!(error = %e, "request failed");
        }
        let mut body = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if let ApiError::Task(TaskError::Dispatch {
            task_id: Some(id), ..
        }) = &self
        {
            body["task_id"] = serde_json::json!(id);
        }
        (status, axum::Json(body)).into_response()
    }
}
