//! Error types for the envelope codec and the upgrade dispatcher.
//!
//! [`EnvelopeError`] covers wire-format failures. [`UpgradeError`] is the
//! set of reasons an upgrade request is refused; each variant maps to an
//! HTTP status code and a structured JSON error response.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All refused upgrades answer with this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "no socket route for path: /missing"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Failure to encode or decode an event envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload could not be serialized to JSON.
    #[error("failed to encode envelope for event {event:?}: {source}")]
    Encode {
        /// Event name the payload was destined for.
        event: String,
        /// Underlying serializer error.
        source: serde_json::Error,
    },

    /// The raw message is not a JSON object of the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The message is a JSON object but carries no `event` field.
    #[error("envelope is missing the `event` field")]
    MissingEvent,

    /// The `event` field is present but empty.
    #[error("envelope event name is empty")]
    EmptyEvent,
}

/// Reasons the upgrade dispatcher refuses a request.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Authentication  | 401 Unauthorized           |
/// | 2000–2999 | Routing         | 404 Not Found              |
/// | 3000–3999 | Server          | 500 Internal Server Error  |
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// No event router is registered for the request path.
    #[error("no socket route for path: {0}")]
    UnknownRoute(String),

    /// The router's authenticator rejected the request.
    #[error("upgrade not authorized for path: {0}")]
    Unauthorized(String),

    /// The router was matched but its accepting server is missing.
    #[error("socket server for path {0} is not initialized")]
    NotInitialized(String),
}

impl UpgradeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Unauthorized(_) => 1001,
            Self::UnknownRoute(_) => 2001,
            Self::NotInitialized(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UnknownRoute(_) => StatusCode::NOT_FOUND,
            Self::NotInitialized(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        // The transport is not reused after a refused upgrade.
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}
