//! Provider abstraction for the upstream generative-AI API
//!
//! Defines the `Provider` trait that decouples the retry controller from the
//! concrete model API. `GeminiProvider` talks to Google's `generateContent`
//! endpoint; tests substitute their own implementations.

pub mod classify;
pub mod gemini;

pub use classify::{classify_error, classify_message};
pub use gemini::GeminiProvider;

use std::future::Future;
use std::pin::Pin;

/// Classification of provider failures to determine the rotation strategy.
///
/// - RateLimited advances the rotation cursor past the failing key
/// - Other records the error but leaves the cursor where it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Quota or rate window exhausted for this key
    RateLimited,
    /// Anything else: transport failure, invalid key, server error
    Other,
}

impl ErrorClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::RateLimited => "rate_limited",
            ErrorClassification::Other => "other_failure",
        }
    }
}

/// Errors from a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(String),

    /// Non-2xx response. `reason` carries the provider's status token
    /// (e.g. `RESOURCE_EXHAUSTED`) when the error body had one.
    #[error("provider returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        reason: Option<String>,
    },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider returned no text")]
    EmptyResponse,
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Abstraction over generative-AI backends.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Model the provider sends prompts to.
    fn model(&self) -> &str;

    /// Submit one prompt with one API key and return the generated text.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Classify a failed call. The default covers any provider whose errors
    /// follow HTTP 429 semantics.
    fn classify_error(&self, error: &ProviderError) -> ErrorClassification {
        classify_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_includes_code_and_message() {
        let err = ProviderError::Status {
            status: 400,
            message: "API key not valid".into(),
            reason: Some("INVALID_ARGUMENT".into()),
        };
        assert_eq!(err.to_string(), "provider returned 400: API key not valid");
    }

    #[test]
    fn classification_labels() {
        assert_eq!(ErrorClassification::RateLimited.label(), "rate_limited");
        assert_eq!(ErrorClassification::Other.label(), "other_failure");
    }
}
