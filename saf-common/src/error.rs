//! Common error types for the SAF archive engine

use thiserror::Error;

/// Common result type for store and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the store ports and configuration loading
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument passed to a store operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal store error
    #[error("Internal error: {0}")]
    Internal(String),
}
