//! Error types for cache operations.

use std::fmt;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The caller-supplied loader failed
    #[error("Loader error: {0}")]
    Loader(String),

    /// Empty key or prefix, or a key that cannot be rendered into a header
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,
}

impl CacheError {
    /// Wrap any displayable failure coming out of a loader.
    ///
    /// ```
    /// use matchday_cache::CacheError;
    ///
    /// let err = CacheError::loader("league table query failed");
    /// assert!(err.is_loader_error());
    /// ```
    pub fn loader(err: impl fmt::Display) -> Self {
        Self::Loader(err.to_string())
    }

    /// Whether the error came from the loader rather than the cache.
    pub fn is_loader_error(&self) -> bool {
        matches!(self, Self::Loader(_))
    }

    /// Whether the backing store itself is unavailable.
    ///
    /// Call sites use this to fall back to the loader directly (degraded
    /// mode) instead of failing the request.
    pub fn is_store_error(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            Self::Connection(_) | Self::Timeout => true,
            _ => false,
        }
    }
}
