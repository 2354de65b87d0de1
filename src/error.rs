//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it is converted to
//! responses. Domain errors (`JobError`, `UploadError`) stay typed inside the
//! crate and are mapped here, at the edge, to status codes.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant holds the message shown to the client
//! - **Pattern matching**: Use `match` to pick the status code for each variant
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets handlers use `?` on domain errors directly
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::jobs::JobError;
use crate::storage::UploadError;

/// Errors returned from HTTP handlers and middleware.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest / ValidationError**: the client sent something unusable (400)
/// - **Unauthorized**: missing or wrong bearer token (401)
/// - **NotFound**: unknown job id (404)
/// - **Conflict**: the job is not in a state that allows the request (409)
/// - **PayloadTooLarge**: upload over the configured limit (413)
/// - **RateLimited**: per-client budget exhausted (429)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ValidationError(String),
    Unauthorized(String),
    Conflict(String),
    PayloadTooLarge(String),
    RateLimited(String),
}

impl AppError {
    /// Client-facing message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ValidationError(msg)
            | AppError::Unauthorized(msg)
            | AppError::Conflict(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::RateLimited(msg) => msg,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Conflict(_) => "conflict",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::RateLimited(_) => "rate_limited",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
        }
    }
}

/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Job not found: 6f1c...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   },
///   "detail": "Job not found: 6f1c..."
/// }
/// ```
///
/// `detail` repeats the message at the top level for simple clients that
/// only read one field.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::Unauthorized(_) = self {
            builder.insert_header(("WWW-Authenticate", "Bearer"));
        }

        builder.json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            },
            "detail": self.message()
        }))
    }
}

/// Maps lifecycle errors to HTTP semantics.
///
/// Store and runner failures are logged here because the client only sees a
/// generic message for them.
impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => AppError::NotFound(err.to_string()),
            JobError::AlreadyTerminal { .. }
            | JobError::InvalidTransition { .. }
            | JobError::DuplicateId(_) => AppError::Conflict(err.to_string()),
            other => {
                tracing::error!(error = %other, "Job operation failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            UploadError::MissingFile
            | UploadError::EmptyFile
            | UploadError::UnsupportedType { .. }
            | UploadError::Interrupted(_) => AppError::BadRequest(err.to_string()),
            UploadError::Io { .. } => {
                tracing::error!(error = %err, "Upload could not be stored");
                AppError::Internal(err.to_string())
            }
        }
    }
}

/// Shorthand for `Result<T, AppError>` used by every handler.
pub type AppResult<T> = Result<T, AppError>;
