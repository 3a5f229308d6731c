//! Storefront Core
//!
//! Multi-tenant commerce backbone: lot-based stock ledgers, order and
//! payment consistency, idempotent daily metric rollups, and a
//! duplicate-suppressing job scheduler.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod message_queue;
pub mod notifications;
pub mod scheduler;
pub mod services;
pub mod workers;

use crate::clock::{Clock, SystemClock};
use crate::notifications::{LoggingNotificationSender, NotificationSender};
use crate::scheduler::{DuplicateSuppressingScheduler, ScheduleStore, SeaOrmScheduleStore};
use crate::services::{CustomerService, MetricsAggregator, OrderLedger, StockLedger, StoreService};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

/// Everything a deployment (or test harness) needs, wired together the same
/// way `main` does it.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub stock: StockLedger,
    pub orders: OrderLedger,
    pub metrics: MetricsAggregator,
    pub stores: StoreService,
    pub customers: CustomerService,
    pub scheduler: Arc<DuplicateSuppressingScheduler>,
    pub workers: workers::WorkerPool,
}

impl AppState {
    /// Wires the full service graph onto an existing database connection
    /// and queue transport.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        queue: Arc<dyn message_queue::WorkQueue>,
        event_sender: Option<events::EventSender>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier: Arc<dyn NotificationSender> = Arc::new(LoggingNotificationSender);
        Self::build_with(db, config, queue, event_sender, clock, notifier)
    }

    /// As [`AppState::build`], with the time source and notification seam
    /// injectable.
    pub fn build_with(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        queue: Arc<dyn message_queue::WorkQueue>,
        event_sender: Option<events::EventSender>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        let entries: Arc<dyn ScheduleStore> =
            Arc::new(SeaOrmScheduleStore::new(db.clone(), clock.clone()));
        let scheduler = Arc::new(DuplicateSuppressingScheduler::new(
            entries,
            queue.clone(),
            clock.clone(),
            config.metrics_queue.clone(),
            Duration::from_secs(config.scheduler_max_interval_secs),
            event_sender.clone(),
        ));

        let stock = StockLedger::new(db.clone());
        let orders = OrderLedger::new(db.clone(), event_sender.clone(), notifier, clock.clone());
        let metrics = MetricsAggregator::new(
            db.clone(),
            orders.clone(),
            event_sender.clone(),
            clock,
            config.low_stock_threshold,
        );
        let workers = workers::WorkerPool::new(
            queue,
            metrics.clone(),
            config.metrics_queue.clone(),
            Duration::from_secs(config.worker_block_timeout_secs),
        );
        let stores = StoreService::new(
            db.clone(),
            scheduler.clone(),
            event_sender,
            config.store_metrics_cron.clone(),
        );
        let customers = CustomerService::new(db.clone());

        Self {
            db,
            config,
            stock,
            orders,
            metrics,
            stores,
            customers,
            scheduler,
            workers,
        }
    }
}
