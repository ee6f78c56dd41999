//! Error types for pdfvar

use thiserror::Error;

/// pdfvar error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error (malformed configuration or inputs)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Event source error (unreadable file, missing column, wrong column type)
    #[error("Event source error: {0}")]
    Source(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
