//! Backend-agnostic queue store contract.
//!
//! The store is the single shared mutable resource in the system: it owns the
//! FIFO task list plus the keyed result and batch records. Two backends
//! implement the contract with identical semantics where possible:
//! [`crate::queue::MemoryStore`] (in-process, non-durable) and
//! [`crate::queue::RedisStore`] (durable, networked). Differences that cannot
//! be papered over (blocking dequeue, record TTLs, batch update atomicity)
//! are documented on the methods below and on the backends.

use async_trait::async_trait;
use thiserror::Error;

use super::task::{BatchSnapshot, Task, TaskResult};
use crate::backend::GenerationRequest;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached. Not retried by the store
    /// itself; callers decide.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store has been closed; all operations fail fast.
    #[error("store is closed")]
    Closed,

    /// A Redis operation failed.
    #[error("redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored record could not be serialized or parsed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared contract over the FIFO task list and keyed result/batch records.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Creates a pending task for `request`, appends it to the tail of the
    /// FIFO ordering, writes its pending result placeholder, and returns the
    /// generated task id.
    async fn enqueue_single(&self, request: GenerationRequest) -> Result<String, StoreError>;

    /// Creates one task per request, all tagged with the batch id (generated
    /// when `batch_id` is `None`), together with the batch record. Returns
    /// the batch id.
    async fn enqueue_batch(
        &self,
        requests: Vec<GenerationRequest>,
        batch_id: Option<String>,
    ) -> Result<String, StoreError>;

    /// Removes and returns the oldest task in FIFO order.
    ///
    /// The durable backend blocks for a short bounded interval and returns
    /// `None` on timeout; the in-process backend returns `None` immediately
    /// when empty.
    async fn dequeue(&self) -> Result<Option<Task>, StoreError>;

    /// Overwrites the result record for `task_id`. Last write wins; there is
    /// no isolation against a concurrent writer of the same id.
    async fn update_result(&self, task_id: &str, result: TaskResult) -> Result<(), StoreError>;

    /// Increments the batch's completed or failed counter and recomputes its
    /// status. Unknown batch ids are logged and ignored.
    ///
    /// Atomicity is backend-specific: the in-process store performs the
    /// read-modify-write under its lock, while the durable store's GET/SETEX
    /// sequence can lose updates under concurrent sibling completions.
    async fn update_batch_progress(
        &self,
        batch_id: &str,
        task_id: &str,
        success: bool,
    ) -> Result<(), StoreError>;

    /// Returns the stored result for `task_id`: a terminal result, the
    /// pending placeholder, or `None` when the id is unknown or expired.
    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError>;

    /// Returns the batch record joined with every child task's result, or
    /// `None` when the batch id is unknown or expired.
    async fn get_batch_status(&self, batch_id: &str) -> Result<Option<BatchSnapshot>, StoreError>;

    /// Liveness probe of the backing store. Never errors.
    async fn health_check(&self) -> bool;

    /// Releases backend connections. Afterwards every operation fails fast
    /// with [`StoreError::Closed`].
    async fn close(&self);
}
