//! Periodic job dispatch with duplicate suppression.
//!
//! Entries live in the database (`schedule_entries`) so every process sees
//! the same definitions. On each tick the scheduler evaluates which entries
//! are due against their cron expressions, then peeks at the pending queue
//! before enqueueing: a job identity already waiting is held back instead of
//! enqueued a second time. A held entry is rechecked on the next tick, so a
//! slow worker delays the job rather than duplicating it.

use crate::{
    clock::Clock,
    db::DbPool,
    entities::schedule_entry,
    errors::ServiceError,
    events::{Event, EventSender},
    message_queue::{Job, WorkQueue},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Task names of the per-store recurring metrics jobs.
pub const TASK_STORE_ORDERS: &str = "metrics.store_orders";
pub const TASK_STORE_PROFIT: &str = "metrics.store_profit";

/// Definition of a new periodic entry. `name` is unique; registering an
/// existing name updates the entry in place.
#[derive(Debug, Clone)]
pub struct ScheduleEntrySpec {
    pub store_id: Option<Uuid>,
    pub name: String,
    pub task: String,
    pub args: serde_json::Value,
    pub cron_expr: String,
}

/// Persistence seam for schedule entries.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn enabled_entries(&self) -> Result<Vec<schedule_entry::Model>, ServiceError>;

    /// Creates the entry, or updates it when the name already exists.
    async fn register(
        &self,
        spec: ScheduleEntrySpec,
    ) -> Result<schedule_entry::Model, ServiceError>;

    /// Stamps `last_run_at` and bumps the run count after a dispatch.
    async fn mark_dispatched(
        &self,
        entry_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    async fn set_enabled(&self, entry_id: Uuid, enabled: bool) -> Result<(), ServiceError>;
}

/// Database-backed entry store. Timestamps come from the injected clock so
/// a new entry's first occurrence is computed against the same time source
/// the due-checks use.
pub struct SeaOrmScheduleStore {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
}

impl SeaOrmScheduleStore {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

#[async_trait]
impl ScheduleStore for SeaOrmScheduleStore {
    async fn enabled_entries(&self) -> Result<Vec<schedule_entry::Model>, ServiceError> {
        let entries = schedule_entry::Entity::find()
            .filter(schedule_entry::Column::Enabled.eq(true))
            .order_by_asc(schedule_entry::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(entries)
    }

    async fn register(
        &self,
        spec: ScheduleEntrySpec,
    ) -> Result<schedule_entry::Model, ServiceError> {
        let existing = schedule_entry::Entity::find()
            .filter(schedule_entry::Column::Name.eq(spec.name.clone()))
            .one(&*self.db)
            .await?;

        let now = self.clock.now();
        match existing {
            Some(entry) => {
                let mut active: schedule_entry::ActiveModel = entry.into();
                active.task = Set(spec.task);
                active.args = Set(spec.args);
                active.cron_expr = Set(spec.cron_expr);
                active.store_id = Set(spec.store_id);
                active.enabled = Set(true);
                active.updated_at = Set(Some(now));
                Ok(active.update(&*self.db).await?)
            }
            None => {
                let model = schedule_entry::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    store_id: Set(spec.store_id),
                    name: Set(spec.name),
                    task: Set(spec.task),
                    args: Set(spec.args),
                    cron_expr: Set(spec.cron_expr),
                    enabled: Set(true),
                    last_run_at: Set(None),
                    total_run_count: Set(0),
                    created_at: Set(now),
                    updated_at: Set(Some(now)),
                };
                Ok(model.insert(&*self.db).await?)
            }
        }
    }

    async fn mark_dispatched(
        &self,
        entry_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let entry = schedule_entry::Entity::find_by_id(entry_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("schedule entry", entry_id))?;
        let run_count = entry.total_run_count + 1;

        let mut active: schedule_entry::ActiveModel = entry.into();
        active.last_run_at = Set(Some(at));
        active.total_run_count = Set(run_count);
        active.updated_at = Set(Some(at));
        active.update(&*self.db).await?;
        Ok(())
    }

    async fn set_enabled(&self, entry_id: Uuid, enabled: bool) -> Result<(), ServiceError> {
        let entry = schedule_entry::Entity::find_by_id(entry_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("schedule entry", entry_id))?;
        let mut active: schedule_entry::ActiveModel = entry.into();
        active.enabled = Set(enabled);
        active.updated_at = Set(Some(self.clock.now()));
        active.update(&*self.db).await?;
        Ok(())
    }
}

/// In-memory entry store for tests and single-process experiments.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: std::sync::Mutex<Vec<schedule_entry::Model>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn enabled_entries(&self) -> Result<Vec<schedule_entry::Model>, ServiceError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().filter(|e| e.enabled).cloned().collect())
    }

    async fn register(
        &self,
        spec: ScheduleEntrySpec,
    ) -> Result<schedule_entry::Model, ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        if let Some(entry) = entries.iter_mut().find(|e| e.name == spec.name) {
            entry.task = spec.task;
            entry.args = spec.args;
            entry.cron_expr = spec.cron_expr;
            entry.store_id = spec.store_id;
            entry.enabled = true;
            entry.updated_at = Some(now);
            return Ok(entry.clone());
        }
        let model = schedule_entry::Model {
            id: Uuid::new_v4(),
            store_id: spec.store_id,
            name: spec.name,
            task: spec.task,
            args: spec.args,
            cron_expr: spec.cron_expr,
            enabled: true,
            last_run_at: None,
            total_run_count: 0,
            created_at: now,
            updated_at: Some(now),
        };
        entries.push(model.clone());
        Ok(model)
    }

    async fn mark_dispatched(
        &self,
        entry_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| ServiceError::not_found("schedule entry", entry_id))?;
        entry.last_run_at = Some(at);
        entry.total_run_count += 1;
        entry.updated_at = Some(at);
        Ok(())
    }

    async fn set_enabled(&self, entry_id: Uuid, enabled: bool) -> Result<(), ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| ServiceError::not_found("schedule entry", entry_id))?;
        entry.enabled = enabled;
        entry.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// Outcome of a due-check for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCheck {
    pub due: bool,
    /// Time until this entry next needs attention.
    pub next_check_in: Duration,
}

/// What a tick did with one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Dispatched { entry_id: Uuid, task: String },
    /// Due, but the same task was already pending on the queue.
    Suppressed { entry_id: Uuid, task: String },
    NotDue { entry_id: Uuid },
    /// Entry skipped because its cron expression does not parse.
    Invalid { entry_id: Uuid },
}

pub struct DuplicateSuppressingScheduler {
    entries: Arc<dyn ScheduleStore>,
    queue: Arc<dyn WorkQueue>,
    clock: Arc<dyn Clock>,
    queue_name: String,
    /// Upper bound on the sleep between ticks, so newly registered entries
    /// are picked up promptly.
    max_interval: Duration,
    event_sender: Option<EventSender>,
}

impl DuplicateSuppressingScheduler {
    pub fn new(
        entries: Arc<dyn ScheduleStore>,
        queue: Arc<dyn WorkQueue>,
        clock: Arc<dyn Clock>,
        queue_name: impl Into<String>,
        max_interval: Duration,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            entries,
            queue,
            clock,
            queue_name: queue_name.into(),
            max_interval,
            event_sender,
        }
    }

    /// Registers the two recurring metrics rollup jobs for a store. Called
    /// on store creation; idempotent on the entry names.
    pub async fn register_store_jobs(
        &self,
        store_id: Uuid,
        cron_expr: &str,
    ) -> Result<(), ServiceError> {
        for task in [TASK_STORE_ORDERS, TASK_STORE_PROFIT] {
            self.entries
                .register(ScheduleEntrySpec {
                    store_id: Some(store_id),
                    name: format!("{task}:{store_id}"),
                    task: task.to_string(),
                    args: json!({ "store_id": store_id }),
                    cron_expr: cron_expr.to_string(),
                })
                .await?;
        }
        info!(store_id = %store_id, cron = cron_expr, "registered store metrics jobs");
        Ok(())
    }

    /// Evaluates whether an entry is due at `now`. The anchor for the next
    /// occurrence is the last dispatch, or the entry's creation when it has
    /// never run. An unparseable cron expression is reported as never due.
    pub fn check(&self, entry: &schedule_entry::Model, now: DateTime<Utc>) -> ScheduleCheck {
        let schedule = match Schedule::from_str(&entry.cron_expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "invalid cron expression");
                return ScheduleCheck {
                    due: false,
                    next_check_in: self.max_interval,
                };
            }
        };

        let anchor = entry.last_run_at.unwrap_or(entry.created_at);
        let due = match schedule.after(&anchor).next() {
            Some(occurrence) => occurrence <= now,
            None => false,
        };

        // After a dispatch (or while held) the entry matters again at its
        // next occurrence from now.
        let next_check_in = schedule
            .after(&now)
            .next()
            .map(|occurrence| (occurrence - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.max_interval)
            .min(self.max_interval);

        ScheduleCheck { due, next_check_in }
    }

    /// Whether a job with this task identity is already pending. A broker
    /// fault is treated as "not present": dispatch proceeds and the queue's
    /// own idempotent consumers absorb a rare duplicate, which beats
    /// silently stalling every schedule on a transient outage.
    pub async fn task_pending(&self, task: &str) -> bool {
        match self.queue.peek(&self.queue_name).await {
            Ok(jobs) => jobs.iter().any(|job| job.name == task),
            Err(e) => {
                warn!(error = %e, task, "queue peek failed, assuming task not pending");
                false
            }
        }
    }

    /// One scheduler pass: dispatch every due entry whose task is not
    /// already pending, and report how long to sleep before the next pass.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<(Vec<TickOutcome>, Duration), ServiceError> {
        let now = self.clock.now();
        let entries = self.entries.enabled_entries().await?;

        let mut outcomes = Vec::with_capacity(entries.len());
        let mut sleep_for = self.max_interval;

        for entry in entries {
            let check = self.check(&entry, now);
            sleep_for = sleep_for.min(check.next_check_in);

            if !check.due {
                let outcome = if Schedule::from_str(&entry.cron_expr).is_err() {
                    TickOutcome::Invalid { entry_id: entry.id }
                } else {
                    TickOutcome::NotDue { entry_id: entry.id }
                };
                outcomes.push(outcome);
                continue;
            }

            if self.task_pending(&entry.task).await {
                debug!(entry = %entry.name, task = %entry.task, "holding entry, task already pending");
                outcomes.push(TickOutcome::Suppressed {
                    entry_id: entry.id,
                    task: entry.task,
                });
                continue;
            }

            let job = Job::new(entry.task.clone(), entry.args.clone());
            self.queue
                .enqueue(&self.queue_name, job)
                .await
                .map_err(|e| ServiceError::QueueError(e.to_string()))?;
            self.entries.mark_dispatched(entry.id, now).await?;

            info!(entry = %entry.name, task = %entry.task, "dispatched job");
            if let Some(sender) = &self.event_sender {
                if let Err(e) = sender
                    .send(Event::JobDispatched {
                        entry_id: entry.id,
                        task: entry.task.clone(),
                    })
                    .await
                {
                    warn!(error = %e, "failed to emit dispatch event");
                }
            }
            outcomes.push(TickOutcome::Dispatched {
                entry_id: entry.id,
                task: entry.task,
            });
        }

        Ok((outcomes, sleep_for))
    }

    /// Runs ticks forever, sleeping the computed interval between passes.
    /// A failed tick is logged and retried after the maximum interval.
    pub async fn run(self: Arc<Self>) {
        loop {
            let sleep_for = match self.tick().await {
                Ok((_, sleep_for)) => sleep_for,
                Err(e) => {
                    warn!(error = %e, "scheduler tick failed");
                    self.max_interval
                }
            };
            tokio::time::sleep(sleep_for.max(Duration::from_millis(100))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message_queue::{InMemoryWorkQueue, QueueError};
    use chrono::TimeZone;

    const EVERY_MINUTE: &str = "0 * * * * *";

    fn scheduler_with(
        queue: Arc<dyn WorkQueue>,
        clock: Arc<ManualClock>,
    ) -> (DuplicateSuppressingScheduler, Arc<InMemoryScheduleStore>) {
        let entries = Arc::new(InMemoryScheduleStore::new());
        let scheduler = DuplicateSuppressingScheduler::new(
            entries.clone(),
            queue,
            clock,
            "metrics",
            Duration::from_secs(30),
            None,
        );
        (scheduler, entries)
    }

    /// Registers a minutely entry anchored at the manual clock's current
    /// time, so due-checks are deterministic regardless of wall time.
    async fn register_minutely(
        entries: &InMemoryScheduleStore,
        clock: &ManualClock,
        task: &str,
    ) -> schedule_entry::Model {
        let entry = entries
            .register(ScheduleEntrySpec {
                store_id: Some(Uuid::new_v4()),
                name: format!("{task}:test"),
                task: task.to_string(),
                args: json!({}),
                cron_expr: EVERY_MINUTE.to_string(),
            })
            .await
            .unwrap();
        entries.mark_dispatched(entry.id, clock.now()).await.unwrap();
        entries
            .enabled_entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.id == entry.id)
            .unwrap()
    }

    #[tokio::test]
    async fn due_entry_is_dispatched_once_per_occurrence() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        clock.advance(chrono::Duration::seconds(40));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Dispatched { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);

        // Consume the job; before the next occurrence nothing more fires.
        queue
            .dequeue("metrics", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::NotDue { .. }));
        assert!(queue.peek("metrics").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_task_suppresses_redispatch() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        register_minutely(&entries, &clock, TASK_STORE_PROFIT).await;

        clock.advance(chrono::Duration::minutes(1));
        scheduler.tick().await.unwrap();
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);

        // Worker has not consumed the job by the next occurrence.
        clock.advance(chrono::Duration::minutes(1));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Suppressed { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn held_entry_fires_exactly_once_after_the_queue_clears() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        clock.advance(chrono::Duration::minutes(1));
        scheduler.tick().await.unwrap();

        // Held while the job sits unconsumed past the next occurrence.
        clock.advance(chrono::Duration::minutes(1));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Suppressed { .. }));

        // A worker drains the queue; the entry is still overdue, so the
        // very next pass dispatches it exactly once.
        queue
            .dequeue("metrics", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Dispatched { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);

        // And only once: the dispatch moved the anchor forward.
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::NotDue { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn suppression_matches_task_identity_not_queue_presence() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        // An unrelated job on the same queue must not hold our entry back.
        queue
            .enqueue("metrics", Job::new("reports.weekly", json!({})))
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(1));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Dispatched { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 2);
    }

    struct PeekFailingQueue {
        inner: InMemoryWorkQueue,
    }

    #[async_trait]
    impl WorkQueue for PeekFailingQueue {
        async fn enqueue(&self, queue: &str, job: Job) -> Result<(), QueueError> {
            self.inner.enqueue(queue, job).await
        }

        async fn peek(&self, _queue: &str) -> Result<Vec<Job>, QueueError> {
            Err(QueueError::ConnectionError("broker unreachable".into()))
        }

        async fn dequeue(
            &self,
            queue: &str,
            timeout: Duration,
        ) -> Result<Option<Job>, QueueError> {
            self.inner.dequeue(queue, timeout).await
        }
    }

    #[tokio::test]
    async fn peek_failure_does_not_stall_dispatch() {
        let queue = Arc::new(PeekFailingQueue {
            inner: InMemoryWorkQueue::new(),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        clock.advance(chrono::Duration::minutes(1));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn invalid_cron_is_skipped_not_fatal() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        entries
            .register(ScheduleEntrySpec {
                store_id: None,
                name: "broken".into(),
                task: "broken.task".into(),
                args: json!({}),
                cron_expr: "not a cron".into(),
            })
            .await
            .unwrap();
        register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        clock.advance(chrono::Duration::minutes(2));
        let (outcomes, _) = scheduler.tick().await.unwrap();
        assert!(matches!(outcomes[0], TickOutcome::Invalid { .. }));
        assert!(matches!(outcomes[1], TickOutcome::Dispatched { .. }));
        assert_eq!(queue.peek("metrics").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sleep_is_bounded_by_max_interval_and_next_occurrence() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 45).unwrap(),
        ));
        let (scheduler, entries) = scheduler_with(queue.clone(), clock.clone());
        let entry = register_minutely(&entries, &clock, TASK_STORE_ORDERS).await;

        // Next occurrence is 15 seconds away, well under the 30s cap.
        let check = scheduler.check(&entry, clock.now());
        assert!(check.next_check_in <= Duration::from_secs(15));

        let (_, sleep_for) = scheduler.tick().await.unwrap();
        assert!(sleep_for <= Duration::from_secs(15));
        assert!(sleep_for <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn store_registration_creates_both_rollup_entries_idempotently() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (scheduler, entries) = scheduler_with(queue, clock);

        let store_id = Uuid::new_v4();
        scheduler
            .register_store_jobs(store_id, EVERY_MINUTE)
            .await
            .unwrap();
        scheduler
            .register_store_jobs(store_id, EVERY_MINUTE)
            .await
            .unwrap();

        let registered = entries.enabled_entries().await.unwrap();
        assert_eq!(registered.len(), 2);
        let tasks: Vec<&str> = registered.iter().map(|e| e.task.as_str()).collect();
        assert!(tasks.contains(&TASK_STORE_ORDERS));
        assert!(tasks.contains(&TASK_STORE_PROFIT));
    }
}
