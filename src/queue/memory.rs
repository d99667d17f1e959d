//! In-process, non-durable queue store.
//!
//! Backed by a `VecDeque` and two hash maps behind a single mutex. Nothing
//! survives a restart and records never expire, so a long-lived process
//! accumulates result and batch records; the durable store is the right
//! choice for unbounded deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::store::{QueueStore, StoreError};
use super::task::{Batch, BatchSnapshot, Task, TaskResult};
use crate::backend::GenerationRequest;

#[derive(Default)]
struct MemoryState {
    queue: VecDeque<Task>,
    results: HashMap<String, TaskResult>,
    batches: HashMap<String, Batch>,
}

/// Non-durable store holding tasks, results, and batches in process memory.
///
/// All operations take the single internal lock, so the batch counter
/// read-modify-write is race-free here: concurrent sibling completions
/// serialize on the mutex and no increment is lost.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        info!("using in-memory queue store (non-persistent)");
        Self {
            state: Mutex::new(MemoryState::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock means a panic while holding it; the state is plain
        // data, so continuing with it is safe.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue_single(&self, request: GenerationRequest) -> Result<String, StoreError> {
        self.check_open()?;

        let task = Task::new(request);
        let task_id = task.task_id.clone();

        let mut state = self.lock();
        state
            .results
            .insert(task_id.clone(), TaskResult::pending(&task_id));
        state.queue.push_back(task);
        drop(state);

        info!(task_id = %task_id, "enqueued task (memory)");
        Ok(task_id)
    }

    async fn enqueue_batch(
        &self,
        requests: Vec<GenerationRequest>,
        batch_id: Option<String>,
    ) -> Result<String, StoreError> {
        self.check_open()?;

        let batch_id = batch_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let tasks: Vec<Task> = requests
            .into_iter()
            .map(|request| Task::for_batch(request, &batch_id))
            .collect();
        let task_ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        let batch = Batch::new(&batch_id, task_ids.clone());

        let mut state = self.lock();
        for task in tasks {
            state
                .results
                .insert(task.task_id.clone(), TaskResult::pending(&task.task_id));
            state.queue.push_back(task);
        }
        state.batches.insert(batch_id.clone(), batch);
        drop(state);

        info!(
            batch_id = %batch_id,
            tasks = task_ids.len(),
            "enqueued batch (memory)"
        );
        Ok(batch_id)
    }

    async fn dequeue(&self) -> Result<Option<Task>, StoreError> {
        self.check_open()?;
        Ok(self.lock().queue.pop_front())
    }

    async fn update_result(&self, task_id: &str, result: TaskResult) -> Result<(), StoreError> {
        self.check_open()?;
        self.lock().results.insert(task_id.to_string(), result);
        Ok(())
    }

    async fn update_batch_progress(
        &self,
        batch_id: &str,
        task_id: &str,
        success: bool,
    ) -> Result<(), StoreError> {
        self.check_open()?;

        let mut state = self.lock();
        match state.batches.get_mut(batch_id) {
            Some(batch) => {
                batch.record_outcome(success);
                let processed = batch.processed();
                let total = batch.total_requests;
                drop(state);
                info!(
                    batch_id = %batch_id,
                    task_id = %task_id,
                    progress = format!("{}/{}", processed, total),
                    "updated batch progress"
                );
            }
            None => {
                drop(state);
                warn!(batch_id = %batch_id, task_id = %task_id, "batch not found");
            }
        }
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError> {
        self.check_open()?;
        Ok(self.lock().results.get(task_id).cloned())
    }

    async fn get_batch_status(&self, batch_id: &str) -> Result<Option<BatchSnapshot>, StoreError> {
        self.check_open()?;

        let state = self.lock();
        let Some(batch) = state.batches.get(batch_id).cloned() else {
            return Ok(None);
        };

        let results = batch
            .task_ids
            .iter()
            .filter_map(|task_id| state.results.get(task_id).cloned())
            .collect();

        Ok(Some(BatchSnapshot { batch, results }))
    }

    async fn health_check(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.lock();
        state.queue.clear();
        state.results.clear();
        state.batches.clear();
        info!("in-memory queue store closed");
    }
}
