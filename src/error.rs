//! Error types for the edge gateway

use std::io;

use thiserror::Error;

/// Result type alias for the edge gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Edge gateway errors
///
/// These only surface at startup or from the CLI. Per-request authentication
/// failures never become an `Error`; the filter folds them into a forward or
/// a 401.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Verification key could not be loaded or decoded
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::KeyMaterial(err.to_string())
    }
}
