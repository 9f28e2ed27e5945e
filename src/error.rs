use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A state transition whose guard did not hold. The order is unchanged.
    #[error("transition rejected: {0}")]
    Precondition(String),

    #[error("invalid code, try again")]
    OtpMismatch,

    #[error("no riders available")]
    NoAvailableRiders,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::OtpMismatch
                | AppError::NoAvailableRiders
                | AppError::Timeout(_)
                | AppError::Upstream(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Precondition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::OtpMismatch => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid code, try again".to_string(),
            ),
            AppError::NoAvailableRiders => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no riders available".to_string(),
            ),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}
