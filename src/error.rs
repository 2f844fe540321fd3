//! Error types for segue
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for segue
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream URL resolution errors
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Control channel errors (connect/write/timeout)
    #[error("Control channel error: {0}")]
    Channel(String),

    /// Player process errors
    #[error("Player error: {0}")]
    Player(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using segue Error
pub type Result<T> = std::result::Result<T, Error>;
