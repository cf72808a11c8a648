#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Reservoir Core
//!
//! `reservoir_core` holds the building blocks shared by the reservoir
//! crates: the error hierarchy, strongly-typed identifiers, configuration
//! types and logging helpers.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for pools, buffers and worker pools
//! - **id**: Strongly-typed identifier types
//! - **utils**: Configuration loading and log level handling

pub mod error;
pub mod id;
pub mod utils;

// Re-export key types for convenience
pub use error::{BufferError, ConfigError, Error, PoolError, Result, WorkerPoolError};
pub use id::{PoolId, ResourceId};
pub use utils::config::{
    BufferConfig, LoggingConfig, PoolConfig, ReservoirConfig, WorkerPoolConfig,
};
pub use utils::logging::LogLevel;
