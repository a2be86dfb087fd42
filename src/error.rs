//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **`SpeechError`**: what the engine itself returns (audio validation, provider
//!   failures, rate limiting, sessions, storage). Built with `thiserror` so each variant
//!   carries its own message format.
//! - **`AppError`**: what HTTP handlers return. It knows how to turn itself into a JSON
//!   response with the right status code.
//!
//! ## Error Taxonomy:
//! - **Validation**: malformed/undersized/oversized audio or text. Deterministic, never retried.
//! - **Provider**: a transient failure reported by a speech backend. Retried with backoff.
//! - **ProviderUnavailable**: retries exhausted.
//! - **RateLimitExceeded**: admission timed out before a token became free.
//! - **NotFound**: unknown session or voice profile.
//!
//! A failed voice authentication is NOT an error; it is a normal negative
//! `AuthenticationResult`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors produced by the speech engine.
///
/// ## Retry Semantics:
/// Only `Provider` errors with a 5xx status (or no status at all, meaning the transport
/// failed or the attempt timed out) are retryable. See [`SpeechError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider error{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },

    #[error("provider unavailable after {attempts} attempt(s): {message}")]
    ProviderUnavailable { attempts: u32, message: String },

    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("{0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("session {id} is {status}")]
    SessionClosed { id: String, status: String },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SpeechError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SpeechError::Validation(msg.into())
    }

    pub fn provider(status: Option<u16>, msg: impl Into<String>) -> Self {
        SpeechError::Provider {
            status,
            message: msg.into(),
        }
    }

    /// Whether the gateway may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SpeechError::Provider { status: None, .. } => true,
            SpeechError::Provider { status: Some(code), .. } => *code >= 500,
            _ => false,
        }
    }

    /// Errors that mean the caller gave up, rather than the operation failing.
    pub fn is_interruption(&self) -> bool {
        matches!(self, SpeechError::Timeout(_) | SpeechError::Cancelled(_))
    }
}

impl From<sled::Error> for SpeechError {
    fn from(err: sled::Error) -> Self {
        SpeechError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SpeechError {
    fn from(err: serde_json::Error) -> Self {
        SpeechError::Storage(format!("serialization failed: {}", err))
    }
}

pub type SpeechResult<T> = Result<T, SpeechError>;

/// Error type returned by HTTP handlers.
///
/// ## Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - Conflict → 409 (expired or ended sessions)
/// - TooManyRequests → 429
/// - ServiceUnavailable → 503
/// - GatewayTimeout → 504
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (storage failures, embedding crashes, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Resource exists but is in a state that forbids the operation
    Conflict(String),

    /// Outbound rate limit could not be satisfied in time
    TooManyRequests(String),

    /// Speech provider kept failing after retries
    ServiceUnavailable(String),

    /// The request deadline elapsed or the request was cancelled
    GatewayTimeout(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::TooManyRequests(msg) => write!(f, "Too many requests: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::GatewayTimeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", msg)
            }
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
        }
    }
}

/// Every error leaves the server as:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "audio too short: 0.30s (minimum 0.50s)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<SpeechError> for AppError {
    fn from(err: SpeechError) -> Self {
        let message = err.to_string();
        match err {
            SpeechError::Validation(msg) => AppError::ValidationError(msg),
            SpeechError::NotFound(msg) => AppError::NotFound(msg),
            SpeechError::SessionExpired(_) | SpeechError::SessionClosed { .. } => {
                AppError::Conflict(message)
            }
            SpeechError::RateLimitExceeded(_) => AppError::TooManyRequests(message),
            SpeechError::ProviderUnavailable { .. } => AppError::ServiceUnavailable(message),
            SpeechError::Provider { status: Some(code), .. } if (400..500).contains(&code) => {
                AppError::BadRequest(message)
            }
            SpeechError::Provider { .. } => AppError::ServiceUnavailable(message),
            SpeechError::Timeout(_) | SpeechError::Cancelled(_) => AppError::GatewayTimeout(message),
            SpeechError::Storage(_) | SpeechError::Internal(_) => AppError::Internal(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>` in handlers.
pub type AppResult<T> = Result<T, AppError>;
