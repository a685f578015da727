//! # Error Handling
//!
//! This module defines the two error layers of the application and how they're
//! converted to HTTP responses.
//!
//! ## Error Layers:
//!
//! ### SessionError (live-session taxonomy)
//! - **Permission**: audio device access refused - fatal to session start, no retry
//! - **Connection**: the live channel failed to open or errored mid-session -
//!   surfaced to the user, triggers a full close, manual reconnect only
//! - **Decode**: a malformed audio payload - logged, the fragment is dropped,
//!   the session continues
//! - **Analysis / Synthesis**: a remote voice call failed or returned an empty
//!   payload - surfaced, the originating operation's busy flag is cleared
//! - **Device**: a non-permission device failure (stream build, output sink)
//! - **InvalidState**: a lifecycle operation issued from the wrong state
//!
//! ### AppError (HTTP surface)
//! Mirrors the REST API contract: each variant maps to a status code and a
//! consistent JSON error body. SessionError converts into AppError so handler
//! code can use `?` across both layers.
//!
//! No partial-failure retries are attempted anywhere: every failure either
//! degrades gracefully (drop one fragment) or terminates the session cleanly.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors raised by the live-conversation core (codec, capture, playback,
/// session controller, remote voice calls).
///
/// ## Error Categories:
/// - **Permission**: device access refused (fatal to session start)
/// - **Connection**: live channel open/stream failure (session terminates)
/// - **Decode**: malformed audio payload (fragment dropped, session continues)
/// - **Analysis / Synthesis**: remote voice service failure (operation aborted)
/// - **Device**: capture/output device failure other than permission
/// - **InvalidState**: operation not legal in the current session state
#[derive(Debug)]
pub enum SessionError {
    /// Microphone / device access refused
    Permission(String),

    /// Live channel failed to open or errored mid-session
    Connection(String),

    /// Malformed audio payload (bad base64, odd byte length, ...)
    Decode(String),

    /// Remote vocal analysis failed or returned an empty profile
    Analysis(String),

    /// Remote speech synthesis failed or returned an empty payload
    Synthesis(String),

    /// Audio device failure that is not a permission problem
    Device(String),

    /// Lifecycle misuse (e.g. starting a session that is already live)
    InvalidState(String),
}

impl SessionError {
    /// Machine-readable error kind, used in WebSocket error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Permission(_) => "permission_error",
            SessionError::Connection(_) => "connection_error",
            SessionError::Decode(_) => "decode_error",
            SessionError::Analysis(_) => "analysis_error",
            SessionError::Synthesis(_) => "synthesis_error",
            SessionError::Device(_) => "device_error",
            SessionError::InvalidState(_) => "invalid_state",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Permission(msg) => write!(f, "Permission denied: {}", msg),
            SessionError::Connection(msg) => write!(f, "Connection error: {}", msg),
            SessionError::Decode(msg) => write!(f, "Decode error: {}", msg),
            SessionError::Analysis(msg) => write!(f, "Vocal analysis error: {}", msg),
            SessionError::Synthesis(msg) => write!(f, "Speech synthesis error: {}", msg),
            SessionError::Device(msg) => write!(f, "Audio device error: {}", msg),
            SessionError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Custom error types for the HTTP surface of the application.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500 errors)
/// - **BadRequest**: client sent invalid data (400 errors)
/// - **NotFound**: requested resource doesn't exist (404 errors)
/// - **ConfigError**: configuration problems (500 errors)
/// - **ValidationError**: data validation failed (400 errors)
/// - **Session**: a SessionError surfaced over HTTP (status depends on kind)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (lock poisoning, unexpected I/O, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// A live-session error surfaced through a REST endpoint
    Session(SessionError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Session(err) => write!(f, "{}", err),
        }
    }
}

/// Conversion of application errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError -> 500 (Internal Server Error)
/// - BadRequest/ValidationError -> 400 (Bad Request)
/// - NotFound -> 404 (Not Found)
/// - Session(Permission) -> 403 (device access refused)
/// - Session(Connection/Analysis/Synthesis) -> 502 (upstream collaborator failed)
/// - Session(Decode) -> 422 (payload understood but not processable)
/// - Session(Device/InvalidState) -> 500 / 409
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "synthesis_error",
///     "message": "Speech synthesis error: empty audio payload",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type) = match self {
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Session(err) => {
                let status = match err {
                    SessionError::Permission(_) => StatusCode::FORBIDDEN,
                    SessionError::Connection(_)
                    | SessionError::Analysis(_)
                    | SessionError::Synthesis(_) => StatusCode::BAD_GATEWAY,
                    SessionError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    SessionError::InvalidState(_) => StatusCode::CONFLICT,
                    SessionError::Device(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind())
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Session errors bubble up through REST handlers with `?`.
impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

/// anyhow errors become internal errors when they reach the HTTP surface.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are client mistakes, not server faults.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Configuration loading can fail for various reasons (missing files, invalid
/// syntax, failed overrides); these are server-side configuration errors.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use the HTTP-facing error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_kinds() {
        assert_eq!(SessionError::Permission("mic".into()).kind(), "permission_error");
        assert_eq!(SessionError::Connection("ws".into()).kind(), "connection_error");
        assert_eq!(SessionError::Decode("b64".into()).kind(), "decode_error");
        assert_eq!(SessionError::Synthesis("empty".into()).kind(), "synthesis_error");
    }

    #[test]
    fn test_http_status_mapping() {
        use actix_web::http::StatusCode;

        let forbidden = AppError::Session(SessionError::Permission("mic denied".into()));
        assert_eq!(forbidden.error_response().status(), StatusCode::FORBIDDEN);

        let upstream = AppError::Session(SessionError::Synthesis("api down".into()));
        assert_eq!(upstream.error_response().status(), StatusCode::BAD_GATEWAY);

        let decode = AppError::Session(SessionError::Decode("odd length".into()));
        assert_eq!(decode.error_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let not_found = AppError::NotFound("asset".into());
        assert_eq!(not_found.error_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_display_includes_message() {
        let err = AppError::Session(SessionError::Connection("channel closed".into()));
        assert!(err.to_string().contains("channel closed"));
    }
}
