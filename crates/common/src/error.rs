//! Configuration and startup error types

use std::path::PathBuf;
use thiserror::Error;

/// Common error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {var}: {reason}")]
    Env { var: String, reason: String },
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
