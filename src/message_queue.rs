//! Work queue transport shared by the scheduler and the worker pool.
//!
//! The scheduler needs one capability most brokers keep private: a
//! non-destructive `peek` at pending payloads, used to suppress duplicate
//! dispatch of a job identity that is already waiting. The Redis
//! implementation keeps jobs as JSON list entries precisely so LRANGE can
//! inspect them without consuming anything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::ConnectionError(err.to_string())
    }
}

/// Job envelope carried on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Task identity, e.g. `metrics.store_orders`. Duplicate suppression
    /// compares this field across pending payloads.
    pub name: String,
    pub args: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            args,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn retrying(mut self) -> Self {
        self.retry_count += 1;
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Queue transport abstraction. `peek` must be non-destructive.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, job: Job) -> Result<(), QueueError>;

    /// Snapshot of pending job descriptors, oldest last (LIFO push order).
    async fn peek(&self, queue: &str) -> Result<Vec<Job>, QueueError>;

    /// Blocking pop with a bounded wait; `None` on timeout.
    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Job>, QueueError>;
}

/// In-memory queue for tests and single-process deployments.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Job>>>>,
    max_size: usize,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            max_size,
        }
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, queue: &str, job: Job) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let entries = queues.entry(queue.to_string()).or_default();
        if entries.len() >= self.max_size {
            return Err(QueueError::QueueFull);
        }
        entries.push_front(job);
        Ok(())
    }

    async fn peek(&self, queue: &str) -> Result<Vec<Job>, QueueError> {
        let queues = self.queues.lock().unwrap();
        Ok(queues
            .get(queue)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn dequeue(&self, queue: &str, _timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        Ok(queues.get_mut(queue).and_then(|entries| entries.pop_back()))
    }
}

/// Redis-backed queue: LPUSH to enqueue, BRPOP to consume, LRANGE to peek.
pub struct RedisWorkQueue {
    client: redis::Client,
    namespace: String,
}

impl RedisWorkQueue {
    pub fn new(redis_url: &str, namespace: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn key(&self, queue: &str) -> String {
        format!("{}:{}", self.namespace, queue)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, QueueError> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, queue: &str, job: Job) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(&job).map_err(|e| QueueError::SerializationError(e.to_string()))?;
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(self.key(queue), payload).await?;
        Ok(())
    }

    async fn peek(&self, queue: &str) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.lrange(self.key(queue), 0, -1).await?;

        let mut jobs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => jobs.push(job),
                // Foreign payloads on a shared list are skipped, not fatal.
                Err(e) => warn!(error = %e, queue, "skipping unparseable queue payload"),
            }
        }
        Ok(jobs)
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> = conn
            .brpop(self.key(queue), timeout.as_secs() as usize)
            .await?;

        match popped {
            Some((_key, payload)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| QueueError::SerializationError(e.to_string())),
            None => Ok(None),
        }
    }
}
