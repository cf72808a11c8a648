#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Reservoir Concurrency
//!
//! Blocking concurrency primitives built on a mutex and condition
//! variables:
//!
//! - [`ResourcePool`]: a capped, lazily-growing pool of expensive resources
//!   with blocking acquire and return-on-drop guards
//! - [`BoundedBuffer`]: a fixed-capacity FIFO with blocking put/take for
//!   producer/consumer hand-off
//! - [`WorkerPool`]: a fixed set of worker threads draining a
//!   `BoundedBuffer` of tasks
//!
//! Every blocking wait re-checks its predicate in a loop, and every
//! timed wait reports a distinct timeout without disturbing shared
//! counters.

/// Fixed-capacity FIFO buffer for producer/consumer hand-off
pub mod buffer;

/// Resource and worker pools
pub mod pool;

// Re-export key types for easier access
pub use buffer::{BoundedBuffer, BufferState, BufferStatus, PutError};
pub use pool::{
    Pooled, PoolStatus, Resource, ResourcePool, WorkerPool, WorkerPoolStats,
};
pub use reservoir_core::error::{BufferError, PoolError, WorkerPoolError};
