//! API error types mapped to HTTP status codes.
//!
//! Each [`ApiError`] variant maps to a status code and produces a JSON body
//! `{"error": "message"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type that implements `IntoResponse`.
///
/// - `BadRequest` → 400 (malformed input, dimension mismatch)
/// - `NotFound` → 404 (point lookups only; queries return empty instead)
/// - `Internal` → 500
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters (400).
    BadRequest(String),
    /// Resource not found (404).
    NotFound(String),
    /// Unexpected server error (500).
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

impl From<hybriddb_core::EngineError> for ApiError {
    fn from(err: hybriddb_core::EngineError) -> Self {
        use hybriddb_core::EngineError;
        match err {
            EngineError::DimMismatch { .. } => ApiError::BadRequest(err.to_string()),
            EngineError::QueueClosed => ApiError::Internal("engine is shutting down".into()),
            EngineError::Corrupt(_) | EngineError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}
