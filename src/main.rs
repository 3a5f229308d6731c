use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use storefront_core as app;

fn init_tracing(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::AppConfig::load()?;
    init_tracing(cfg.log_level(), cfg.log_json);

    let db = Arc::new(app::db::establish_connection_from_app_config(&cfg).await?);

    // Redis broker with in-memory fallback, so a missing broker degrades to
    // single-process operation instead of refusing to start.
    let queue: Arc<dyn app::message_queue::WorkQueue> =
        match app::message_queue::RedisWorkQueue::new(&cfg.redis_url, cfg.queue_namespace.clone())
        {
            Ok(queue) => {
                info!(url = %cfg.redis_url, "using Redis work queue");
                Arc::new(queue)
            }
            Err(err) => {
                error!(error = %err, "Redis unavailable, falling back to in-memory queue");
                Arc::new(app::message_queue::InMemoryWorkQueue::new())
            }
        };

    let (event_sender, event_rx) = app::events::channel(1024);
    let _event_task = app::events::spawn_event_processor(event_rx);

    let state = app::AppState::build(db, cfg.clone(), queue, Some(event_sender));

    let worker_handles = state.workers.spawn(cfg.worker_concurrency);
    info!(concurrency = cfg.worker_concurrency, "worker pool started");

    let scheduler = state.scheduler.clone();
    let scheduler_handle = tokio::spawn(scheduler.run());
    info!(
        max_interval_secs = cfg.scheduler_max_interval_secs,
        "scheduler started"
    );

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler_handle.abort();
    for handle in worker_handles {
        handle.abort();
    }
    Ok(())
}
