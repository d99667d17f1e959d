//! Task queue with interchangeable in-process and durable backends.
//!
//! This module owns the system's single shared mutable resource: the FIFO
//! task list plus the keyed result and batch records, exposed through the
//! [`QueueStore`] trait. Two backends implement the same contract:
//!
//! - [`MemoryStore`]: in-process, non-durable, no record expiry
//! - [`RedisStore`]: durable over a Redis-compatible protocol, records expire
//!   after one hour
//!
//! Ordering guarantee: strict FIFO per store instance, no priorities. Which
//! worker drains which task is not ordered, so two tasks enqueued in order
//! may still complete out of order.

pub mod memory;
pub mod redis;
pub mod store;
pub mod task;

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use store::{QueueStore, StoreError};
pub use task::{Batch, BatchSnapshot, BatchStatus, Task, TaskResult, TaskStatus};
