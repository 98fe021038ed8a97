//! Error types for the orchestrator HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// ca-common error
    #[error(transparent)]
    Common(#[from] ca_common::Error),
}

impl ApiError {
    /// Whether the failure lies with the service rather than the caller
    pub fn is_server_error(&self) -> bool {
        self.parts().0.is_server_error()
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        use ca_common::Error as E;
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Common(err) => match err {
                E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                E::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
                E::UnexpectedBackend { .. } => (StatusCode::BAD_REQUEST, "UNEXPECTED_BACKEND"),
                E::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                E::IdentityConflict(_) => (StatusCode::CONFLICT, "IDENTITY_CONFLICT"),
                E::NoCapableBackend(_) => (StatusCode::SERVICE_UNAVAILABLE, "NO_CAPABLE_BACKEND"),
                E::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::Common(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
