//! Command implementations for the reservoir CLI

pub mod buffer;
pub mod config;
pub mod pool;

use serde::Serialize;
use thiserror::Error;

/// A stress run that completed but broke an invariant
#[derive(Debug, Error)]
pub enum StressError {
    /// More resources were held at once than the pool allows
    #[error("peak outstanding {peak} exceeded capacity {capacity}")]
    CapacityExceeded { peak: usize, capacity: usize },

    /// Some resource was never disposed, or was disposed twice
    #[error("{created} resources created but {disposed} disposed")]
    DisposalMismatch { created: usize, disposed: usize },

    /// Items were duplicated, lost or reordered by the buffer
    #[error("buffer stress failed: {duplicates} duplicates, {lost} lost, {reordered} out of order")]
    BufferAnomalies {
        duplicates: usize,
        lost: usize,
        reordered: usize,
    },

    /// A harness thread panicked
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Print a report to stdout as pretty JSON.
pub(crate) fn print_report<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
