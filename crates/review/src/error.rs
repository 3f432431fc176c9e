//! Errors surfaced to review callers

/// Terminal review failures. Intermediate provider failures never show up
/// here; they are retried inside the rotation loop.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("Code and language are required")]
    Validation,

    #[error("No API keys configured. Set GEMINI_API_KEYS to a comma-separated list of keys.")]
    NoCredentials,

    #[error("all {keys} API keys failed after {attempts} attempts: {last_error}")]
    Exhausted {
        keys: usize,
        attempts: u32,
        last_error: String,
    },
}

impl From<key_pool::Error> for ReviewError {
    fn from(err: key_pool::Error) -> Self {
        match err {
            key_pool::Error::NoCredentials => ReviewError::NoCredentials,
            key_pool::Error::Exhausted {
                keys,
                attempts,
                last_error,
            } => ReviewError::Exhausted {
                keys,
                attempts,
                last_error,
            },
        }
    }
}

/// Result alias for review operations.
pub type Result<T> = std::result::Result<T, ReviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_one_to_one() {
        assert!(matches!(
            ReviewError::from(key_pool::Error::NoCredentials),
            ReviewError::NoCredentials
        ));

        let err = ReviewError::from(key_pool::Error::Exhausted {
            keys: 2,
            attempts: 8,
            last_error: "429 Too Many Requests".into(),
        });
        assert_eq!(
            err.to_string(),
            "all 2 API keys failed after 8 attempts: 429 Too Many Requests"
        );
    }
}
