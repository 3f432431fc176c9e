//! HTTP error responses
//!
//! Every terminal failure a caller can see maps onto one `ApiError` variant.
//! Intermediate provider failures never get here; the rotation loop absorbs
//! them.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use review::ReviewError;

const EXHAUSTED_MESSAGE: &str = "All API keys are rate limited even after waiting. \
     Please try again in 1-2 minutes or add more API keys.";
const EXHAUSTED_SUGGESTION: &str =
    "Create more free API keys at https://aistudio.google.com/app/apikey";
const INBOUND_LIMIT_MESSAGE: &str = "Too many requests. Please wait a minute before trying again.";

/// Seconds a client is told to back off after hitting the inbound limit.
pub const RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Review(#[from] ReviewError),

    /// Body missing, not JSON, or the wrong shape.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("request body too large")]
    PayloadTooLarge,

    /// Inbound per-minute limit hit.
    #[error("too many requests")]
    TooManyRequests,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Review(ReviewError::Validation) | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Review(ReviewError::NoCredentials) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Review(ReviewError::Exhausted { .. }) | ApiError::TooManyRequests => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Review(err @ ReviewError::Exhausted { keys, .. }) => serde_json::json!({
                "error": EXHAUSTED_MESSAGE,
                "details": err.to_string(),
                "keysAvailable": keys,
                "suggestion": EXHAUSTED_SUGGESTION,
            }),
            ApiError::Review(err) => serde_json::json!({ "error": err.to_string() }),
            ApiError::InvalidBody(details) => serde_json::json!({
                "error": ReviewError::Validation.to_string(),
                "details": details,
            }),
            ApiError::PayloadTooLarge => serde_json::json!({ "error": self.to_string() }),
            ApiError::TooManyRequests => serde_json::json!({
                "error": INBOUND_LIMIT_MESSAGE,
                "retryAfter": RETRY_AFTER_SECS,
            }),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::InvalidBody(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            self.body().to_string(),
        )
            .into_response()
    }
}
