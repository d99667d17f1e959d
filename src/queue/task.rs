//! Task, result, and batch records.
//!
//! These are the serializable records the queue store owns: a `Task` waiting
//! in the FIFO list, the `TaskResult` keyed by task id, and the `Batch`
//! aggregate tracking a group of related tasks. Workers and the pool manager
//! only ever hold ids and transient copies; the store is the single owner.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{GenerationOutput, GenerationRequest};

/// Status of a task or its result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued, no terminal result written yet.
    Pending,
    /// Processed and the backend call succeeded.
    Completed,
    /// Processed and the backend call failed or timed out.
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of generation work as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique opaque identifier.
    pub task_id: String,
    /// Batch this task belongs to, if any.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// The opaque generation payload.
    pub request: GenerationRequest,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// Current status; `Pending` while queued.
    pub status: TaskStatus,
}

impl Task {
    /// Creates a standalone pending task with a fresh id.
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            batch_id: None,
            request,
            created_at: Utc::now(),
            status: TaskStatus::Pending,
        }
    }

    /// Creates a pending task tagged with a batch id.
    pub fn for_batch(request: GenerationRequest, batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            ..Self::new(request)
        }
    }
}

/// The pending or terminal outcome record for a task.
///
/// Written as a pending placeholder at enqueue time and overwritten exactly
/// once by the worker that processed the task. There is at most one writer
/// per task id in this design; a concurrent duplicate writer would race
/// last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Id of the task this result belongs to.
    pub task_id: String,
    /// Pending, completed, or failed.
    pub status: TaskStatus,
    /// Path of the generated audio on success.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Human-readable outcome summary.
    pub message: String,
    /// Error description when the task failed.
    #[serde(default)]
    pub error: Option<String>,
    /// When the terminal result was written; `None` while pending.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock processing time in milliseconds; zero while pending.
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl TaskResult {
    /// Creates the pending placeholder written at enqueue time.
    pub fn pending(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self {
            message: format!("Task {} is still pending", task_id),
            task_id,
            status: TaskStatus::Pending,
            output_path: None,
            error: None,
            completed_at: None,
            processing_time_ms: 0,
        }
    }

    /// Creates a successful terminal result.
    pub fn success(task_id: impl Into<String>, output: GenerationOutput, elapsed: Duration) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            output_path: Some(output.file_path),
            message: output.message,
            error: None,
            completed_at: Some(Utc::now()),
            processing_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Creates a failed terminal result carrying the backend error.
    pub fn failure(
        task_id: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output_path: None,
            message: "Failed to generate audio".to_string(),
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
            processing_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Creates a failed terminal result for a task that hit the hard timeout.
    pub fn timeout(task_id: impl Into<String>, elapsed: Duration) -> Self {
        let message = format!(
            "Generation timed out after {:.1}s",
            elapsed.as_secs_f64()
        );
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output_path: None,
            error: Some(message.clone()),
            message,
            completed_at: Some(Utc::now()),
            processing_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Returns whether this is a successful terminal result.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Returns whether a terminal result has been written.
    pub fn is_terminal(&self) -> bool {
        self.status != TaskStatus::Pending
    }
}

/// Derived status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// No child task processed yet.
    Pending,
    /// Some but not all child tasks processed.
    Processing,
    /// Every child task processed. Completed means "no longer pending",
    /// not "fully successful": a batch whose children all failed still
    /// completes.
    Completed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "pending"),
            BatchStatus::Processing => write!(f, "processing"),
            BatchStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Aggregate progress record for a group of related tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique batch identifier.
    pub batch_id: String,
    /// Child task ids in enqueue order.
    pub task_ids: Vec<String>,
    /// Number of child tasks.
    pub total_requests: usize,
    /// Children that completed successfully.
    pub completed: usize,
    /// Children that failed.
    pub failed: usize,
    /// Derived status; see [`BatchStatus`].
    pub status: BatchStatus,
    /// When the batch was created.
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Creates a pending batch over the given child task ids.
    pub fn new(batch_id: impl Into<String>, task_ids: Vec<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            total_requests: task_ids.len(),
            task_ids,
            completed: 0,
            failed: 0,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Records one child outcome and recomputes the derived status.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }

        self.status = if self.processed() >= self.total_requests {
            BatchStatus::Completed
        } else {
            BatchStatus::Processing
        };
    }

    /// Returns how many child tasks have been processed.
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

/// A batch record joined with every child task's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// The aggregate batch record.
    pub batch: Batch,
    /// Child results in `task_ids` order, pending placeholders included.
    pub results: Vec<TaskResult>,
}
