//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **LiveError**: failures inside the live audio bridge (devices, remote
//!   session, frame decoding). These are caught at the controller boundary and
//!   turned into status updates; they never reach the HTTP layer as faults.
//! - **AppError**: errors returned from HTTP handlers, converted into JSON
//!   responses through actix-web's `ResponseError` trait.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant can hold additional information (String, numbers, etc.)
//! - **Pattern matching**: Use `match` to handle different error types
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types (enables `?`)
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors raised by the live audio session bridge.
///
/// ## Error Categories:
/// - **PermissionDenied**: the microphone was refused or there is no microphone
/// - **DeviceUnavailable**: an input/output device failed while being acquired or used
/// - **ConnectionFailed**: the remote conversational session could not be opened
/// - **DecodeError**: one incoming audio envelope was malformed (the frame is dropped)
/// - **RemoteClosed**: the server ended the session (a normal terminal transition)
/// - **SessionAlreadyActive**: `start()` was called while a session was not idle
#[derive(Debug, Clone, PartialEq)]
pub enum LiveError {
    PermissionDenied,
    DeviceUnavailable(String),
    ConnectionFailed(String),
    DecodeError(String),
    RemoteClosed,
    SessionAlreadyActive,
}

impl LiveError {
    /// Machine-readable code used in WebSocket error messages and logs.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::PermissionDenied => "permission_denied",
            LiveError::DeviceUnavailable(_) => "device_unavailable",
            LiveError::ConnectionFailed(_) => "connection_failed",
            LiveError::DecodeError(_) => "decode_error",
            LiveError::RemoteClosed => "remote_closed",
            LiveError::SessionAlreadyActive => "session_already_active",
        }
    }
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveError::PermissionDenied => write!(f, "microphone permission denied"),
            LiveError::DeviceUnavailable(msg) => write!(f, "audio device unavailable: {}", msg),
            LiveError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            LiveError::DecodeError(msg) => write!(f, "malformed audio frame: {}", msg),
            LiveError::RemoteClosed => write!(f, "remote session closed"),
            LiveError::SessionAlreadyActive => write!(f, "a live session is already active"),
        }
    }
}

impl std::error::Error for LiveError {}

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **Conflict**: Request conflicts with the current live session state (409 errors)
/// - **ValidationError**: Data validation failed (400 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (device failures, channel closures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// The live session is in a state that doesn't allow this request
    Conflict(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - Internal → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - Conflict → 409 (Conflict)
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "a live session is already active",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                actix_web::http::StatusCode::CONFLICT,  // 409
                "conflict",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// Config validation and other plumbing return `anyhow::Result`; those become
/// `ValidationError` when they bubble out of a handler with `?`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault → 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Conversion from bridge errors to HTTP errors.
///
/// Only `SessionAlreadyActive` is a client-visible conflict; everything else
/// reaching the HTTP layer means the controller itself is gone.
impl From<LiveError> for AppError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::SessionAlreadyActive => AppError::Conflict(err.to_string()),
            LiveError::DecodeError(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Type alias for Results that use our HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

/// Type alias for Results inside the live bridge.
pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_error_display_mentions_denied() {
        let msg = LiveError::PermissionDenied.to_string();
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_session_already_active_maps_to_conflict() {
        let app_err: AppError = LiveError::SessionAlreadyActive.into();
        assert!(matches!(app_err, AppError::Conflict(_)));
        assert_eq!(
            app_err.error_response().status(),
            actix_web::http::StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_live_error_codes_are_distinct() {
        let errors = [
            LiveError::PermissionDenied,
            LiveError::DeviceUnavailable("x".into()),
            LiveError::ConnectionFailed("x".into()),
            LiveError::DecodeError("x".into()),
            LiveError::RemoteClosed,
            LiveError::SessionAlreadyActive,
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
