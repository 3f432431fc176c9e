//! Error types for key rotation

/// Errors from the rotation controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no API keys configured")]
    NoCredentials,

    #[error("all {keys} API keys failed after {attempts} attempts: {last_error}")]
    Exhausted {
        keys: usize,
        attempts: u32,
        last_error: String,
    },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
