//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libjustpost::error::PlatformError;
use libjustpost::JustPostError;
use serde_json::json;
use thiserror::Error;

/// Errors a handler can return; rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing user identity")]
    Unauthorized,

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] JustPostError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnknownPlatform(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(err) => core_status(err),
        }
    }
}

fn core_status(err: &JustPostError) -> StatusCode {
    match err {
        JustPostError::InvalidInput(_) | JustPostError::State(_) => StatusCode::BAD_REQUEST,
        JustPostError::Platform(PlatformError::Validation(_)) => StatusCode::BAD_REQUEST,
        JustPostError::Platform(PlatformError::NotConnected(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        ApiError::Core(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
