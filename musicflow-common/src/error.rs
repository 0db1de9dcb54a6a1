//! Common error types for MusicFlow

use thiserror::Error;

/// Common result type for MusicFlow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across MusicFlow services
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generation collaborator failure
    #[error("Generation error: {0}")]
    Generation(String),

    /// Registry no longer accepts submissions
    #[error("Registry is shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
