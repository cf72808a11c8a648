//! Utility types.
//!
//! Configuration structures (loadable from TOML) and log level handling.

pub mod config;
pub mod logging;

pub use config::ReservoirConfig;
pub use logging::LogLevel;
