//! Error types for the reservoir primitives.
//!
//! Each primitive has its own error type. The root error type, `Error`,
//! wraps all of them so that callers juggling several primitives can use a
//! single `Result` alias and `?`.
//!
//! Every error here is recoverable: a timeout or a failed construction
//! leaves the pool or buffer in a usable state.

use crate::id::ResourceId;
use std::time::Duration;
use thiserror::Error;

/// Root error type for the reservoir crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Bounded buffer errors
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Worker pool errors
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by resource pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been closed; no further acquisitions succeed
    #[error("resource pool is closed")]
    Closed,

    /// Timed out waiting for a resource while the pool was at capacity
    #[error("timed out after {0:?} waiting for a pooled resource")]
    Timeout(Duration),

    /// No idle resource and no spare capacity (non-blocking acquire only)
    #[error("resource pool exhausted")]
    Exhausted,

    /// The resource factory failed; the reserved capacity slot was released
    #[error("failed to create resource: {0}")]
    CreationFailed(String),

    /// A resource was handed back to a pool it does not belong to
    #[error("resource {0} does not belong to this pool")]
    InvalidRelease(ResourceId),
}

/// Errors returned by bounded buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Timed out waiting for space (put) or for an item (take)
    #[error("buffer operation timed out after {0:?}")]
    Timeout(Duration),

    /// The buffer is full (non-blocking put only)
    #[error("buffer is full")]
    Full,

    /// The buffer is empty (non-blocking take only)
    #[error("buffer is empty")]
    Empty,
}

/// Errors returned by the worker pool.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    /// The worker pool no longer accepts tasks
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// The task queue is full (non-blocking submission only)
    #[error("worker pool queue is full")]
    QueueFull,

    /// Workers did not finish within the shutdown grace period
    #[error("workers did not terminate within {0:?}; remaining tasks discarded")]
    ShutdownTimeout(Duration),

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range or inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration document could not be parsed or rendered
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// An unrecognised log level name
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type used across the reservoir crates.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = PoolError::Closed.into();
        assert!(matches!(err, Error::Pool(PoolError::Closed)));

        let err: Error = BufferError::Full.into();
        assert_eq!(err.to_string(), "Buffer error: buffer is full");

        let err: Error = ConfigError::Invalid("capacity must be positive".into()).into();
        assert!(err.to_string().contains("capacity must be positive"));
    }

    #[test]
    fn test_invalid_release_mentions_resource() {
        let id = ResourceId::new();
        let err = PoolError::InvalidRelease(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_toml_error_maps_to_parse() {
        let err = toml::from_str::<toml::Value>("capacity = = 3").unwrap_err();
        let config_err: ConfigError = err.into();
        assert!(matches!(config_err, ConfigError::Parse(_)));
    }
}
