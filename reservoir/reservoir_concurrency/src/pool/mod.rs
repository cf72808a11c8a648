//! Pooling of expensive resources and of worker threads.
//!
//! - Resource pools for reusable resources like connections or file handles
//! - Worker pools for running tasks on a fixed set of threads

pub mod resource;
pub mod worker;

// Re-export key types from resource
pub use resource::{Pooled, PoolStatus, Resource, ResourcePool};

// Re-export key types from worker
pub use worker::{WorkerPool, WorkerPoolStats};
