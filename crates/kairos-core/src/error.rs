//! Error taxonomy shared by handlers and the runtime.
//!
//! [`HandlerError`] is what user handlers return. Each variant belongs to an
//! [`ErrorCategory`], which decides the HTTP status and the `code` field of
//! the JSON error envelope:
//!
//! ```json
//! {"error": {"code": "not_found", "message": "user 42 not found"}}
//! ```

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::di::InjectionError;

/// Result type returned by handlers.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Classification of request-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or invalid input.
    Validation,
    /// Missing or invalid credentials.
    Authentication,
    /// Authenticated but not permitted.
    Authorization,
    /// Resource or route does not exist.
    NotFound,
    /// Route exists under a different method.
    MethodNotAllowed,
    /// State conflict.
    Conflict,
    /// Request body exceeded the configured limit.
    PayloadTooLarge,
    /// The request or a downstream call ran out of time.
    Timeout,
    /// A dependency is unavailable.
    Unavailable,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Returns the HTTP status used for this category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code used in the error envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Conflict => "conflict",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

/// Error returned by a request handler.
///
/// Handler errors never escape the request that produced them: the
/// dispatcher renders them into a response and the listener keeps serving.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request was invalid.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Credentials were missing or invalid.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller is not allowed to do this.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request deadline passed.
    #[error("request deadline exceeded")]
    Timeout,

    /// A dependency is not available.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Unexpected failure; the source is logged but never sent to clients.
    #[error("internal error: {message}")]
    Internal {
        /// Message safe to return to clients.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl HandlerError {
    /// Creates an internal error without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error as an internal failure.
    #[must_use]
    pub fn from_source(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: "internal server error".to_string(),
            source: Some(err.into()),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::BadRequest(_) => ErrorCategory::Validation,
            Self::Unauthenticated(_) => ErrorCategory::Authentication,
            Self::Forbidden(_) => ErrorCategory::Authorization,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Timeout => ErrorCategory::Timeout,
            Self::Unavailable(_) => ErrorCategory::Unavailable,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Message that is safe to expose to clients.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<InjectionError> for HandlerError {
    fn from(err: InjectionError) -> Self {
        Self::Internal {
            message: "dependency unavailable".to_string(),
            source: Some(err.into()),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}
