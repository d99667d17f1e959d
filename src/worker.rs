//! Worker loop and worker pool manager.
//!
//! Each [`Worker`] is one cooperative loop that drains the shared queue store
//! one task at a time: probe store health, dequeue, invoke the generation
//! backend through the retry policy under a hard timeout, persist the result,
//! and update batch progress. The [`WorkerPool`] owns a configurable number
//! of workers as spawned tokio tasks and coordinates all-or-nothing startup,
//! cooperative shutdown, and status snapshots.
//!
//! Failure policy: backend errors and timeouts are absorbed into a failed
//! [`TaskResult`]; store errors on the worker's own path are logged and
//! answered with a backoff, never a crash. Only enqueue-side store errors
//! propagate to callers, and they do so outside this module.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{GenerationBackend, RetryPolicy};
use crate::config::ForgeConfig;
use crate::queue::{QueueStore, Task, TaskResult};

/// Tasks processed between throughput log lines.
const THROUGHPUT_REPORT_INTERVAL: u64 = 10;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Startup could not launch every requested worker; none were left
    /// running.
    #[error("worker startup failed: {0}")]
    WorkerStartup(String),

    /// The pool is already running.
    #[error("worker pool is already running")]
    AlreadyRunning,
}

/// Observational snapshot of one worker.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    /// Identifier assigned at spawn time (`worker-1`, `worker-2`, ...).
    pub worker_id: String,
    /// Whether the worker's run flag is still set.
    pub running: bool,
    /// Tasks this worker has processed since start.
    pub tasks_processed: u64,
}

/// Observational snapshot of the pool. No side effects.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Number of workers the pool currently owns.
    pub total_workers: usize,
    /// How many of them still have their run flag set.
    pub running_workers: usize,
    /// Per-worker detail.
    pub workers: Vec<WorkerStatus>,
}

/// State shared between a running worker and the pool's status snapshots.
struct WorkerState {
    worker_id: String,
    running: AtomicBool,
    tasks_processed: AtomicU64,
    started_at: Instant,
}

impl WorkerState {
    fn new(worker_id: String) -> Self {
        Self {
            worker_id,
            running: AtomicBool::new(true),
            tasks_processed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.worker_id.clone(),
            running: self.running.load(Ordering::SeqCst),
            tasks_processed: self.tasks_processed.load(Ordering::SeqCst),
        }
    }
}

/// One cooperative loop draining tasks from the shared queue store.
struct Worker {
    state: Arc<WorkerState>,
    store: Arc<dyn QueueStore>,
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
    task_timeout: Duration,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl Worker {
    fn new(
        state: Arc<WorkerState>,
        store: Arc<dyn QueueStore>,
        backend: Arc<dyn GenerationBackend>,
        config: &ForgeConfig,
    ) -> Self {
        Self {
            state,
            store,
            backend,
            retry: RetryPolicy::from_config(config),
            task_timeout: config.task_timeout,
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
        }
    }

    /// Main loop. The run flag is re-checked at the top of every iteration;
    /// a worker mid-task finishes that task before observing a stop.
    async fn run(self) {
        let worker_id = self.state.worker_id.clone();
        info!(worker_id = %worker_id, "worker started");

        while self.state.running.load(Ordering::SeqCst) {
            if !self.store.health_check().await {
                warn!(worker_id = %worker_id, "queue store unhealthy, backing off");
                tokio::time::sleep(self.error_backoff).await;
                continue;
            }

            // The dequeue wait itself is bounded by the task timeout; hitting
            // it just means "no task this round".
            let dequeued = match tokio::time::timeout(self.task_timeout, self.store.dequeue()).await
            {
                Err(_) => {
                    debug!(worker_id = %worker_id, "dequeue wait expired");
                    continue;
                }
                Ok(Err(e)) => {
                    error!(worker_id = %worker_id, error = %e, "failed to dequeue task");
                    tokio::time::sleep(self.error_backoff).await;
                    continue;
                }
                Ok(Ok(dequeued)) => dequeued,
            };

            match dequeued {
                Some(task) => self.process_task(task).await,
                None => {
                    debug!(worker_id = %worker_id, "no tasks available");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %worker_id, "worker stopped");
    }

    /// Processes one task end to end. Every outcome, including a timeout or
    /// an absorbed error, ends with a persisted terminal result.
    async fn process_task(&self, task: Task) {
        let worker_id = &self.state.worker_id;
        info!(worker_id = %worker_id, task_id = %task.task_id, "processing task");

        let start = Instant::now();
        let generation = tokio::time::timeout(
            self.task_timeout,
            self.retry.run(|| self.backend.generate(&task.request)),
        )
        .await;
        let elapsed = start.elapsed();

        let result = match generation {
            Ok(Ok(output)) => {
                info!(
                    worker_id = %worker_id,
                    task_id = %task.task_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
                TaskResult::success(&task.task_id, output, elapsed)
            }
            Ok(Err(err)) => {
                warn!(
                    worker_id = %worker_id,
                    task_id = %task.task_id,
                    error = %err,
                    "task failed"
                );
                TaskResult::failure(&task.task_id, err.to_string(), elapsed)
            }
            Err(_) => {
                warn!(
                    worker_id = %worker_id,
                    task_id = %task.task_id,
                    timeout_ms = self.task_timeout.as_millis() as u64,
                    "task timed out"
                );
                TaskResult::timeout(&task.task_id, elapsed)
            }
        };

        let success = result.is_success();

        // Both writes are best-effort: a failed write is logged, never
        // re-raised, so one bad record cannot stall the pipeline.
        if let Err(e) = self.store.update_result(&task.task_id, result).await {
            error!(
                worker_id = %worker_id,
                task_id = %task.task_id,
                error = %e,
                "failed to persist task result"
            );
        }

        if let Some(batch_id) = &task.batch_id {
            if let Err(e) = self
                .store
                .update_batch_progress(batch_id, &task.task_id, success)
                .await
            {
                error!(
                    worker_id = %worker_id,
                    batch_id = %batch_id,
                    task_id = %task.task_id,
                    error = %e,
                    "failed to update batch progress"
                );
            }
        }

        let processed = self.state.tasks_processed.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % THROUGHPUT_REPORT_INTERVAL == 0 {
            let elapsed_secs = self.state.started_at.elapsed().as_secs_f64();
            if elapsed_secs > 0.0 {
                info!(
                    worker_id = %worker_id,
                    processed,
                    tasks_per_min = format!("{:.1}", processed as f64 / elapsed_secs * 60.0),
                    "worker throughput"
                );
            }
        }
    }
}

/// Owns the workers as spawned tasks and coordinates their lifecycle.
pub struct WorkerPool {
    config: ForgeConfig,
    store: Arc<dyn QueueStore>,
    backend: Arc<dyn GenerationBackend>,
    workers: Vec<Arc<WorkerState>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool over a shared store and backend. No workers run until
    /// [`start_workers`](Self::start_workers) is called.
    pub fn new(
        config: ForgeConfig,
        store: Arc<dyn QueueStore>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            workers: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Launches `num_workers` workers, each as an independently scheduled
    /// tokio task.
    ///
    /// Startup is all-or-nothing: every worker is constructed before any is
    /// spawned, and a configuration that cannot produce a full pool aborts
    /// with [`PoolError::WorkerStartup`] leaving nothing running.
    pub async fn start_workers(&mut self) -> Result<(), PoolError> {
        if !self.handles.is_empty() {
            return Err(PoolError::AlreadyRunning);
        }

        self.config
            .validate()
            .map_err(|e| PoolError::WorkerStartup(e.to_string()))?;

        info!(num_workers = self.config.num_workers, "starting workers");

        let mut pending = Vec::with_capacity(self.config.num_workers);
        for i in 0..self.config.num_workers {
            let state = Arc::new(WorkerState::new(format!("worker-{}", i + 1)));
            let worker = Worker::new(
                Arc::clone(&state),
                Arc::clone(&self.store),
                Arc::clone(&self.backend),
                &self.config,
            );
            pending.push((state, worker));
        }

        for (state, worker) in pending {
            self.workers.push(state);
            self.handles.push(tokio::spawn(worker.run()));
        }

        info!(num_workers = self.workers.len(), "all workers started");
        Ok(())
    }

    /// Cooperatively stops every worker and waits for its task to finish.
    ///
    /// This only clears the run flags: a worker mid-task completes it
    /// (bounded by the task timeout) before observing the stop. Individual
    /// task failures are collected in the logs, never re-raised.
    pub async fn stop_workers(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        info!("stopping all workers");

        for state in &self.workers {
            state.running.store(false, Ordering::SeqCst);
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed during shutdown");
            }
        }

        self.workers.clear();
        info!("all workers stopped");
    }

    /// Returns a snapshot of worker states. Purely observational.
    pub fn status(&self) -> PoolStatus {
        let workers: Vec<WorkerStatus> = self.workers.iter().map(|s| s.status()).collect();
        let running_workers = workers.iter().filter(|w| w.running).count();

        PoolStatus {
            total_workers: workers.len(),
            running_workers,
            workers,
        }
    }

    /// Returns whether any workers have been launched and not yet stopped.
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, GenerationOutput, GenerationRequest};
    use crate::queue::{BatchStatus, MemoryStore, TaskStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Backend that always succeeds.
    struct OkBackend;

    #[async_trait]
    impl GenerationBackend for OkBackend {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationOutput, BackendError> {
            Ok(GenerationOutput::new(
                format!("output/{}.wav", request.text.len()),
                "Audio generated successfully",
            ))
        }
    }

    /// Backend that fails with a validation error for one specific text.
    struct FailFor {
        target: String,
    }

    #[async_trait]
    impl GenerationBackend for FailFor {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationOutput, BackendError> {
            if request.text == self.target {
                Err(BackendError::InvalidRequest(format!(
                    "cannot synthesize '{}'",
                    request.text
                )))
            } else {
                Ok(GenerationOutput::new("output/ok.wav", "ok"))
            }
        }
    }

    /// Backend that never returns within any reasonable test timeout.
    struct HangingBackend;

    #[async_trait]
    impl GenerationBackend for HangingBackend {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutput, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("test backend should have been timed out")
        }
    }

    /// Backend that raises transient errors before eventually succeeding.
    struct FlakyBackend {
        failures: AtomicU32,
    }

    #[async_trait]
    impl GenerationBackend for FlakyBackend {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutput, BackendError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                Err(BackendError::Unavailable("flaky".into()))
            } else {
                Ok(GenerationOutput::new("output/flaky.wav", "ok"))
            }
        }
    }

    fn test_config() -> ForgeConfig {
        ForgeConfig::new()
            .with_num_workers(1)
            .with_task_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(10))
            .with_error_backoff(Duration::from_millis(10))
            .with_retry_attempts(3)
            .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(4))
    }

    async fn wait_for_terminal_result(
        store: &MemoryStore,
        task_id: &str,
    ) -> crate::queue::TaskResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = store.get_result(task_id).await.unwrap() {
                if result.is_terminal() {
                    return result;
                }
            }
            assert!(Instant::now() < deadline, "task {} never finished", task_id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_pool_processes_single_task() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(test_config(), store.clone(), Arc::new(OkBackend));
        pool.start_workers().await.unwrap();

        let task_id = store
            .enqueue_single(GenerationRequest::new("hello"))
            .await
            .unwrap();

        let result = wait_for_terminal_result(&store, &task_id).await;
        assert!(result.is_success());
        assert!(result.output_path.is_some());

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_task_processed_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(
            test_config().with_num_workers(4),
            store.clone(),
            Arc::new(OkBackend),
        );
        pool.start_workers().await.unwrap();

        let task_id = store
            .enqueue_single(GenerationRequest::new("once"))
            .await
            .unwrap();

        let first = wait_for_terminal_result(&store, &task_id).await;

        // The result must not oscillate after the single processing pass.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = store.get_result(&task_id).await.unwrap().unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.completed_at, second.completed_at);

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_batch_with_one_failure_completes() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(FailFor {
            target: "two".to_string(),
        });
        let mut pool = WorkerPool::new(test_config(), store.clone(), backend);
        pool.start_workers().await.unwrap();

        let batch_id = store
            .enqueue_batch(
                vec![
                    GenerationRequest::new("one"),
                    GenerationRequest::new("two"),
                    GenerationRequest::new("three"),
                ],
                None,
            )
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let snapshot = loop {
            let snapshot = store.get_batch_status(&batch_id).await.unwrap().unwrap();
            if snapshot.batch.status == BatchStatus::Completed {
                break snapshot;
            }
            assert!(Instant::now() < deadline, "batch never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(snapshot.batch.completed, 2);
        assert_eq!(snapshot.batch.failed, 1);
        assert_eq!(
            snapshot.batch.completed + snapshot.batch.failed,
            snapshot.batch.total_requests
        );
        assert_eq!(snapshot.results.len(), 3);

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_timeout_yields_failed_result() {
        let store = Arc::new(MemoryStore::new());
        let config = test_config().with_task_timeout(Duration::from_millis(200));
        let mut pool = WorkerPool::new(config, store.clone(), Arc::new(HangingBackend));
        pool.start_workers().await.unwrap();

        let task_id = store
            .enqueue_single(GenerationRequest::new("slow"))
            .await
            .unwrap();

        let result = wait_for_terminal_result(&store, &task_id).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.message.contains("timed out"));
        // Wall-clock time tracks the hard timeout, not the backend.
        assert!(result.processing_time_ms >= 200);
        assert!(result.processing_time_ms < 2000);

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_worker_survives_backend_failure() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(FailFor {
            target: "bad".to_string(),
        });
        let mut pool = WorkerPool::new(test_config(), store.clone(), backend);
        pool.start_workers().await.unwrap();

        let bad = store
            .enqueue_single(GenerationRequest::new("bad"))
            .await
            .unwrap();
        let good = store
            .enqueue_single(GenerationRequest::new("good"))
            .await
            .unwrap();

        let bad_result = wait_for_terminal_result(&store, &bad).await;
        assert_eq!(bad_result.status, TaskStatus::Failed);
        assert!(bad_result.error.is_some());

        // The same worker keeps draining after the failure.
        let good_result = wait_for_terminal_result(&store, &good).await;
        assert!(good_result.is_success());

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_transient_failures_retried_to_success() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(FlakyBackend {
            failures: AtomicU32::new(2),
        });
        let mut pool = WorkerPool::new(test_config(), store.clone(), backend);
        pool.start_workers().await.unwrap();

        let task_id = store
            .enqueue_single(GenerationRequest::new("eventually"))
            .await
            .unwrap();

        let result = wait_for_terminal_result(&store, &task_id).await;
        assert!(result.is_success());

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(
            test_config().with_num_workers(3),
            store.clone(),
            Arc::new(OkBackend),
        );
        pool.start_workers().await.unwrap();

        let status = pool.status();
        assert_eq!(status.total_workers, 3);
        assert_eq!(status.running_workers, 3);
        assert!(pool.is_running());

        pool.stop_workers().await;

        let status = pool.status();
        assert_eq!(status.running_workers, 0);
        assert!(!pool.is_running());

        // Stopping again is a no-op.
        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(test_config(), store, Arc::new(OkBackend));

        pool.start_workers().await.unwrap();
        assert!(matches!(
            pool.start_workers().await,
            Err(PoolError::AlreadyRunning)
        ));

        pool.stop_workers().await;
    }

    #[tokio::test]
    async fn test_zero_workers_aborts_startup() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(
            test_config().with_num_workers(0),
            store,
            Arc::new(OkBackend),
        );

        let err = pool.start_workers().await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerStartup(_)));
        assert!(!pool.is_running());
        assert_eq!(pool.status().total_workers, 0);
    }

    #[tokio::test]
    async fn test_status_reports_processed_counts() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = WorkerPool::new(test_config(), store.clone(), Arc::new(OkBackend));
        pool.start_workers().await.unwrap();

        let task_id = store
            .enqueue_single(GenerationRequest::new("count me"))
            .await
            .unwrap();
        wait_for_terminal_result(&store, &task_id).await;

        let total: u64 = pool.status().workers.iter().map(|w| w.tasks_processed).sum();
        assert_eq!(total, 1);

        pool.stop_workers().await;
    }
}
