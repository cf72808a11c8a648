//! Configuration types.
//!
//! Every primitive has a small configuration struct with sensible
//! defaults. `ReservoirConfig` groups them so a whole setup can be loaded
//! from one TOML document:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [pool]
//! capacity = 4
//! acquire_timeout_ms = 250
//!
//! [buffer]
//! capacity = 3
//! ```
//!
//! Durations are expressed in milliseconds.

use crate::error::ConfigError;
use crate::utils::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live resources
    pub capacity: usize,

    /// Resources created eagerly when the pool is built (0 = fully lazy)
    pub initial_size: usize,

    /// Deadline applied by `acquire`; `None` waits indefinitely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            initial_size: 0,
            acquire_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    /// A lazily-growing pool of the given capacity with no acquire deadline.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Set the number of resources created up front.
    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Set the deadline used by `acquire`.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The deadline used by `acquire`, if any.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        if self.initial_size > self.capacity {
            return Err(ConfigError::Invalid(format!(
                "pool initial_size ({}) exceeds capacity ({})",
                self.initial_size, self.capacity
            )));
        }
        Ok(())
    }
}

/// Configuration for a bounded buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of slots
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

impl BufferConfig {
    /// A buffer with the given number of slots.
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads; `None` means one per logical CPU
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Capacity of the task queue
    pub queue_capacity: usize,

    /// Name prefix for worker threads
    pub thread_name_prefix: String,

    /// How long `shutdown_timeout` style callers should wait for workers
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: None,
            queue_capacity: 1000,
            thread_name_prefix: "reservoir-worker".to_string(),
            shutdown_grace_ms: 5000,
        }
    }
}

impl WorkerPoolConfig {
    /// Grace period allowed for workers to finish on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "worker pool needs at least one thread".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "worker queue capacity must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "worker thread name prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level emitted
    pub level: LogLevel,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Logging settings
    pub logging: LoggingConfig,

    /// Resource pool settings
    pub pool: PoolConfig,

    /// Bounded buffer settings
    pub buffer: BufferConfig,

    /// Worker pool settings
    pub workers: WorkerPoolConfig,
}

impl ReservoirConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml_str(&source)?)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.buffer.validate()?;
        self.workers.validate()?;
        Ok(())
    }
}
