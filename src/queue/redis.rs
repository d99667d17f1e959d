//! Redis-backed durable queue store.
//!
//! Tasks live in a single Redis list (LPUSH at the head, BRPOP from the tail
//! for FIFO order). Result and batch records are JSON strings under prefixed
//! keys written with SETEX so they expire after [`RECORD_TTL_SECS`] and the
//! store's memory stays bounded.
//!
//! # Key layout
//!
//! - `{queue_name}`: the task list
//! - `{queue_name}:result:{task_id}`: result records
//! - `{queue_name}:batch:{batch_id}`: batch records

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};
use uuid::Uuid;

use super::store::{QueueStore, StoreError};
use super::task::{Batch, BatchSnapshot, Task, TaskResult};
use crate::backend::GenerationRequest;

/// TTL for result and batch records (1 hour).
const RECORD_TTL_SECS: u64 = 3600;

/// How long one blocking dequeue waits before returning `None`.
const DEQUEUE_TIMEOUT_SECS: usize = 1;

/// Builds the result and batch key prefixes for a queue name.
fn key_prefixes(queue_name: &str) -> (String, String) {
    (
        format!("{}:result", queue_name),
        format!("{}:batch", queue_name),
    )
}

/// Durable store over a Redis-compatible protocol.
///
/// Uses a single multiplexed [`ConnectionManager`], which reconnects
/// automatically; concurrent workers clone it per operation.
pub struct RedisStore {
    redis: ConnectionManager,
    queue_name: String,
    result_prefix: String,
    batch_prefix: String,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connects to Redis and creates the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(queue_name = %queue_name, "connected to redis queue store");
        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a store from an existing connection manager.
    ///
    /// Useful when sharing one connection across components.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let (result_prefix, batch_prefix) = key_prefixes(queue_name);
        Self {
            redis,
            queue_name: queue_name.to_string(),
            result_prefix,
            batch_prefix,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn result_key(&self, task_id: &str) -> String {
        format!("{}:{}", self.result_prefix, task_id)
    }

    fn batch_key(&self, batch_id: &str) -> String {
        format!("{}:{}", self.batch_prefix, batch_id)
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue_single(&self, request: GenerationRequest) -> Result<String, StoreError> {
        self.check_open()?;

        let task = Task::new(request);
        let task_id = task.task_id.clone();
        let task_data = serde_json::to_string(&task)?;
        let placeholder = serde_json::to_string(&TaskResult::pending(&task_id))?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.lpush(&self.queue_name, task_data)
            .set_ex(self.result_key(&task_id), placeholder, RECORD_TTL_SECS);
        pipe.query_async::<_, ()>(&mut conn).await?;

        info!(task_id = %task_id, "enqueued task (redis)");
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
        let batch_data = serde_json::to_string(&batch)?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for task in &tasks {
            let task_data = serde_json::to_string(task)?;
            let placeholder = serde_json::to_string(&TaskResult::pending(&task.task_id))?;
            pipe.lpush(&self.queue_name, task_data).set_ex(
                self.result_key(&task.task_id),
                placeholder,
                RECORD_TTL_SECS,
            );
        }
        pipe.set_ex(
            self.batch_key(&batch_id),
            batch_data,
            RECORD_TTL_SECS,
        );
        pipe.query_async::<_, ()>(&mut conn).await?;

        info!(
            batch_id = %batch_id,
            tasks = task_ids.len(),
            "enqueued batch (redis)"
        );
        Ok(batch_id)
    }

    async fn dequeue(&self) -> Result<Option<Task>, StoreError> {
        self.check_open()?;

        let mut conn = self.redis.clone();

        // BRPOP blocks for a bounded interval and returns nil on timeout, so
        // a worker never parks here indefinitely.
        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(DEQUEUE_TIMEOUT_SECS)
            .query_async(&mut conn)
            .await?;

        match result {
            Some((_, task_data)) => {
                let task: Task = serde_json::from_str(&task_data)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn update_result(&self, task_id: &str, result: TaskResult) -> Result<(), StoreError> {
        self.check_open()?;

        let result_data = serde_json::to_string(&result)?;
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(self.result_key(task_id), result_data, RECORD_TTL_SECS)
            .await?;

        info!(task_id = %task_id, status = %result.status, "updated task result");
        Ok(())
    }

    async fn update_batch_progress(
        &self,
        batch_id: &str,
        task_id: &str,
        success: bool,
    ) -> Result<(), StoreError> {
        self.check_open()?;

        let batch_key = self.batch_key(batch_id);
        let mut conn = self.redis.clone();

        // GET, mutate, SETEX: there is no WATCH or transaction here, so two
        // sibling completions landing together can lose an increment. Known
        // lost-update gap inherited from the record layout.
        let batch_data: Option<String> = conn.get(&batch_key).await?;
        let Some(batch_data) = batch_data else {
            warn!(batch_id = %batch_id, task_id = %task_id, "batch not found");
            return Ok(());
        };

        let mut batch: Batch = serde_json::from_str(&batch_data)?;
        batch.record_outcome(success);

        let updated = serde_json::to_string(&batch)?;
        conn.set_ex::<_, _, ()>(&batch_key, updated, RECORD_TTL_SECS)
            .await?;

        info!(
            batch_id = %batch_id,
            task_id = %task_id,
            progress = format!("{}/{}", batch.processed(), batch.total_requests),
            "updated batch progress"
        );
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError> {
        self.check_open()?;

        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.result_key(task_id)).await?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn get_batch_status(&self, batch_id: &str) -> Result<Option<BatchSnapshot>, StoreError> {
        self.check_open()?;

        let mut conn = self.redis.clone();
        let batch_data: Option<String> = conn.get(self.batch_key(batch_id)).await?;
        let Some(batch_data) = batch_data else {
            return Ok(None);
        };
        let batch: Batch = serde_json::from_str(&batch_data)?;

        let mut results = Vec::with_capacity(batch.task_ids.len());
        for task_id in &batch.task_ids {
            // Expired child records are simply absent from the join.
            let data: Option<String> = conn.get(self.result_key(task_id)).await?;
            if let Some(data) = data {
                results.push(serde_json::from_str(&data)?);
            }
        }

        Ok(Some(BatchSnapshot { batch, results }))
    }

    async fn health_check(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    async fn close(&self) {
        // The multiplexed connection is released when the store drops; the
        // flag makes every later operation fail fast with `Closed`.
        self.closed.store(true, Ordering::SeqCst);
        info!(queue_name = %self.queue_name, "redis queue store closed");
    }
}
