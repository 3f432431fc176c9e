//! Rate-limit detection for provider failures
//!
//! Structured signals win: HTTP 429 or a `RESOURCE_EXHAUSTED` status token in
//! the error body. Failures without one fall back to sniffing the error text
//! for the usual quota/rate phrases. The text match is provider-specific and
//! only as good as the messages the provider happens to send.

use std::sync::LazyLock;

use regex::Regex;

use crate::{ErrorClassification, ProviderError};

/// Provider status tokens that mean the key's quota window is used up.
const EXHAUSTED_REASONS: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

/// Bare `rate` only at a word start so "generateContent" and
/// "generativelanguage" in provider messages don't count. `rate limit` is
/// matched anywhere to catch camelCase reasons like `userRateLimitExceeded`.
static RATE_LIMIT_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)429|quota|\brate|rate[\s_-]?limit").expect("rate limit pattern is valid")
});

/// Classify free-form error text.
pub fn classify_message(message: &str) -> ErrorClassification {
    if RATE_LIMIT_TEXT.is_match(message) {
        ErrorClassification::RateLimited
    } else {
        ErrorClassification::Other
    }
}

/// Classify a provider error, preferring structured fields over text.
pub fn classify_error(error: &ProviderError) -> ErrorClassification {
    match error {
        ProviderError::Status { status: 429, .. } => ErrorClassification::RateLimited,
        ProviderError::Status {
            reason: Some(reason),
            ..
        } if EXHAUSTED_REASONS.contains(&reason.as_str()) => ErrorClassification::RateLimited,
        ProviderError::Status { message, .. } => classify_message(message),
        ProviderError::Http(message) | ProviderError::InvalidResponse(message) => {
            classify_message(message)
        }
        ProviderError::EmptyResponse => ErrorClassification::Other,
    }
}
