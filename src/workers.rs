//! Queue consumers for the scheduled metrics jobs.
//!
//! Each worker blocks on the metrics queue and dispatches on the job's task
//! name. Job bodies are idempotent rollup recomputations, so a retried or
//! rarely-duplicated job converges to the same stored value.

use crate::{
    entities::daily_metric::MetricKind,
    errors::ServiceError,
    message_queue::{Job, WorkQueue},
    scheduler::{TASK_STORE_ORDERS, TASK_STORE_PROFIT},
    services::MetricsAggregator,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct StoreJobArgs {
    store_id: Uuid,
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    metrics: MetricsAggregator,
    queue_name: String,
    block_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        metrics: MetricsAggregator,
        queue_name: impl Into<String>,
        block_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            metrics,
            queue_name: queue_name.into(),
            block_timeout,
        }
    }

    /// Spawns `concurrency` consumer tasks. They run until the process
    /// exits.
    pub fn spawn(&self, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move { pool.consume_loop(worker_id).await })
            })
            .collect()
    }

    async fn consume_loop(&self, worker_id: usize) {
        info!(worker_id, queue = %self.queue_name, "worker started");
        loop {
            let job = match self.queue.dequeue(&self.queue_name, self.block_timeout).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker_id, error = %e, "dequeue failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if let Err(e) = self.handle(&job).await {
                self.handle_failure(job, e).await;
            }
        }
    }

    /// Executes one job. Unknown task names are dropped with a warning so a
    /// stale producer cannot wedge the queue.
    pub async fn handle(&self, job: &Job) -> Result<(), ServiceError> {
        match job.name.as_str() {
            TASK_STORE_ORDERS => {
                let args = parse_args(job)?;
                self.rollup(args.store_id, MetricKind::Orders).await
            }
            TASK_STORE_PROFIT => {
                let args = parse_args(job)?;
                self.rollup(args.store_id, MetricKind::Profit).await
            }
            other => {
                warn!(task = other, job_id = %job.id, "unknown task, dropping job");
                Ok(())
            }
        }
    }

    async fn rollup(&self, store_id: Uuid, kind: MetricKind) -> Result<(), ServiceError> {
        let today = self.metrics.today();
        match kind {
            MetricKind::Orders => {
                self.metrics.aggregate_orders(store_id, today).await?;
            }
            MetricKind::Profit => {
                self.metrics.aggregate_profit(store_id, today).await?;
            }
        }
        Ok(())
    }

    /// Re-enqueues a failed job until its retry budget runs out. A job that
    /// cannot be re-enqueued, or a client error that cannot succeed on
    /// retry, is dropped.
    async fn handle_failure(&self, job: Job, err: ServiceError) {
        if err.is_client_error() {
            error!(job_id = %job.id, task = %job.name, error = %err, "job rejected, not retrying");
            return;
        }
        if job.retries_exhausted() {
            error!(job_id = %job.id, task = %job.name, error = %err, "job failed, retries exhausted");
            return;
        }

        let retry = job.retrying();
        warn!(
            job_id = %retry.id,
            task = %retry.name,
            retry_count = retry.retry_count,
            error = %err,
            "job failed, re-enqueueing"
        );
        if let Err(e) = self.queue.enqueue(&self.queue_name, retry).await {
            error!(error = %e, "failed to re-enqueue job, dropping it");
        }
    }
}

fn parse_args(job: &Job) -> Result<StoreJobArgs, ServiceError> {
    serde_json::from_value(job.args.clone())
        .map_err(|e| ServiceError::ValidationError(format!("bad job args: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_job_args_parse() {
        let store_id = Uuid::new_v4();
        let job = Job::new(TASK_STORE_ORDERS, json!({ "store_id": store_id }));
        let args = parse_args(&job).unwrap();
        assert_eq!(args.store_id, store_id);
    }

    #[test]
    fn malformed_args_are_a_client_error() {
        let job = Job::new(TASK_STORE_ORDERS, json!({ "store": "nope" }));
        let err = parse_args(&job).unwrap_err();
        assert!(err.is_client_error());
    }
}
