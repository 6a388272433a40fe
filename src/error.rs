//! Error types for the rate limiting engine.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// A missing configuration is not an error: the resolver reports it as
/// `Ok(None)` and the facade admits the request.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The shared state store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A resolved configuration names an algorithm the engine does not implement
    #[error("Unsupported rate limiting algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Stored state could not be decoded into the expected shape
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A limit configuration was rejected at publish time
    #[error("Invalid limit configuration: {0}")]
    InvalidConfig(String),

    /// Process configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error category, for callers choosing a failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StoreUnavailable,
    UnsupportedAlgorithm,
    Serialization,
    InvalidConfig,
    Config,
    Io,
}

impl LimiterError {
    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LimiterError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            LimiterError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            LimiterError::Serialization(_) => ErrorKind::Serialization,
            LimiterError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            LimiterError::Config(_) => ErrorKind::Config,
            LimiterError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for LimiterError {
    fn from(err: serde_json::Error) -> Self {
        LimiterError::Serialization(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
