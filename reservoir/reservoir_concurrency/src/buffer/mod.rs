//! Bounded buffers for producer/consumer hand-off.
//!
//! - [`BoundedBuffer`]: a circular array guarded by a mutex, with one
//!   condition variable per direction

pub mod bounded;

pub use bounded::{BoundedBuffer, BufferState, BufferStatus, PutError};
