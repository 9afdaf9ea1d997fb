//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: failures that surface on the HTTP side (config endpoint,
//!   websocket upgrade refusals). Converted to JSON responses via `ResponseError`.
//! - **ServiceError**: failures inside the transcription and synthesis adapters.
//!   These never reach a client. The conversation loop catches them, logs them and
//!   degrades to an empty result so the caller's turn is never stranded.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "service_unavailable",
//!     "message": "Maximum concurrent conversations reached (10)",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// HTTP-facing error types.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **ServiceUnavailable**: Capacity exhausted, try again later (503)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// No room for another conversation right now
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn kind(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.kind().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.kind();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Failures inside a transcription or synthesis backend.
#[derive(Debug)]
pub enum ServiceError {
    /// Transport failure or non-success HTTP status from a remote backend
    Http(String),

    /// Backend answered but the payload could not be understood
    Decode(String),

    /// The call did not finish within its budget
    Timeout(String),

    /// Backend is missing configuration or otherwise cannot serve
    Unavailable(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Http(msg) => write!(f, "Backend request failed: {}", msg),
            ServiceError::Decode(msg) => write!(f, "Backend response not understood: {}", msg),
            ServiceError::Timeout(msg) => write!(f, "Backend timed out: {}", msg),
            ServiceError::Unavailable(msg) => write!(f, "Backend unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout(err.to_string())
        } else if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Http(err.to_string())
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Decode(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
