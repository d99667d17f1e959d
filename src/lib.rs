//! voice-forge: durable task queue and worker pool for audio generation.
//!
//! This library accepts units of generation work, queues them in an
//! in-process or Redis-backed store, and drives a pool of async workers that
//! invoke a pluggable [`backend::GenerationBackend`] through a retry and
//! error-classification layer, recording per-task results and per-batch
//! aggregate progress.
//!
//! # Architecture
//!
//! ```text
//!   Producer ──enqueue──► QueueStore (memory | redis)
//!                              │ dequeue (FIFO)
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!          Worker 1        Worker 2        Worker N
//!              │   RetryPolicy + task timeout  │
//!              └──────► GenerationBackend ◄────┘
//!                              │
//!                   results / batch progress
//!                        back into the store
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voice_forge::{ForgeConfig, MemoryStore, QueueStore, WorkerPool};
//!
//! let config = ForgeConfig::from_env()?;
//! let store = Arc::new(MemoryStore::new());
//! let backend = Arc::new(MyTtsBackend::new());
//!
//! let mut pool = WorkerPool::new(config, store.clone(), backend);
//! pool.start_workers().await?;
//!
//! let task_id = store.enqueue_single(request).await?;
//! // ... poll store.get_result(&task_id) ...
//!
//! pool.stop_workers().await;
//! ```

pub mod backend;
pub mod config;
pub mod queue;
pub mod worker;

// Re-export the main types for convenience
pub use backend::{
    BackendError, ErrorClass, GenerationBackend, GenerationOutput, GenerationRequest, RetryPolicy,
};
pub use config::{ConfigError, ForgeConfig};
pub use queue::{
    Batch, BatchSnapshot, BatchStatus, MemoryStore, QueueStore, RedisStore, StoreError, Task,
    TaskResult, TaskStatus,
};
pub use worker::{PoolError, PoolStatus, WorkerPool, WorkerStatus};
