//! Error types for quotaguard.

use thiserror::Error;

/// Main error type for quotaguard setup and operation.
#[derive(Error, Debug)]
pub enum QuotaGuardError {
    /// Configuration-related errors, raised before any request is processed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store failures
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a counter store.
///
/// A store failure is never turned into an admit or deny decision; it is
/// handed back to the caller of the limiter untouched.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The shared store could not be reached or rejected the command
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store answered with something that is not a counter record
    #[error("Malformed counter record for '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// Result type alias for quotaguard operations.
pub type Result<T> = std::result::Result<T, QuotaGuardError>;
