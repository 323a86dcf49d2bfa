//! Error types for the Warden service.

use std::time::Duration;

use thiserror::Error;

/// Operational failure of a counter store.
///
/// A missing counter is not an error; stores report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis protocol or connection errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store did not answer within the configured timeout
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store cannot serve requests at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the rate decision engine.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Both the primary and the secondary store failed.
    #[error("Rate limit stores exhausted: {source}")]
    FailoverExhausted {
        #[source]
        source: StoreError,
    },
}

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        WardenError::Config(err.to_string())
    }
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
