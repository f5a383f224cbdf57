//! Error handling for the signal coordinator

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown feed id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Detection backend failed its health probe
    #[error("Detection backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Detection backend answered with something we could not use
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Request exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Detection backend returned a non-success status
    #[error("Detection API error: {0}")]
    Api(String),

    /// Hardware endpoint rejected the update
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Frame capture failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure means the link to the backend is gone
    /// (as opposed to a single bad round).
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect(),
            Error::BackendUnavailable(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::BackendUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BACKEND_UNAVAILABLE",
                msg.clone(),
            ),
            Error::MalformedResponse(msg) => (
                StatusCode::BAD_GATEWAY,
                "MALFORMED_RESPONSE",
                msg.clone(),
            ),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::Api(msg) => (StatusCode::BAD_GATEWAY, "API_ERROR", msg.clone()),
            Error::Hardware(msg) => (StatusCode::BAD_GATEWAY, "HARDWARE_ERROR", msg.clone()),
            Error::Capture(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAPTURE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
