mod common;

use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::time::Duration;
use storefront_core::{
    entities::{daily_metric, daily_metric::MetricKind, schedule_entry},
    message_queue::WorkQueue,
    scheduler::{TickOutcome, TASK_STORE_ORDERS, TASK_STORE_PROFIT},
    services::{
        order_ledger::{CreateLineRequest, CreateOrderRequest},
        stores::CreateStoreRequest,
    },
};

use common::TestApp;

fn create_request(name: &str) -> CreateStoreRequest {
    CreateStoreRequest {
        name: name.to_string(),
        country: "KE".to_string(),
        phone_number: None,
        city: None,
        instagram_handle: None,
        facebook_handle: None,
        category_ids: Vec::new(),
    }
}

#[tokio::test]
async fn creating_a_store_registers_its_rollup_jobs() {
    let app = TestApp::new().await;
    let store = app
        .state
        .stores
        .create_store(create_request("Souko General"))
        .await
        .unwrap();

    let entries = schedule_entry::Entity::find()
        .filter(schedule_entry::Column::StoreId.eq(store.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    let tasks: Vec<&str> = entries.iter().map(|e| e.task.as_str()).collect();
    assert!(tasks.contains(&TASK_STORE_ORDERS));
    assert!(tasks.contains(&TASK_STORE_PROFIT));
    assert!(entries.iter().all(|e| e.enabled));
}

#[tokio::test]
async fn scheduled_rollups_flow_from_tick_to_stored_buckets() {
    let app = TestApp::new().await;
    let store = app
        .state
        .stores
        .create_store(create_request("Souko General"))
        .await
        .unwrap();
    let customer = app.seed_customer(store.id, "asha@example.com").await;
    let product = app
        .seed_product(store.id, "Beans", dec!(60.00), dec!(100.00))
        .await;
    app.seed_lot(product.id, 10).await;

    let order = app
        .state
        .orders
        .create_order(CreateOrderRequest {
            store_id: store.id,
            customer_id: customer.id,
            delivery_fee: None,
            confirmed: None,
        })
        .await
        .unwrap();
    app.state
        .orders
        .create_line(CreateLineRequest {
            order_id: order.id,
            product_id: product.id,
            quantity: 2,
            cost: None,
        })
        .await
        .unwrap();

    // Default cadence is every five minutes; step past one occurrence.
    app.clock.advance(chrono::Duration::minutes(6));
    let (outcomes, _) = app.state.scheduler.tick().await.unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, TickOutcome::Dispatched { .. })));

    // Drain the queue the way a worker would.
    while let Some(job) = app
        .queue
        .dequeue(&app.state.config.metrics_queue, Duration::from_secs(1))
        .await
        .unwrap()
    {
        app.state.workers.handle(&job).await.unwrap();
    }

    let buckets = daily_metric::Entity::find()
        .filter(daily_metric::Column::StoreId.eq(store.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(buckets.len(), 2);
    let orders_bucket = buckets
        .iter()
        .find(|b| b.kind == MetricKind::Orders.to_string())
        .unwrap();
    assert_eq!(orders_bucket.value, dec!(1));
}

#[tokio::test]
async fn unconsumed_jobs_are_not_enqueued_twice() {
    let app = TestApp::new().await;
    app.state
        .stores
        .create_store(create_request("Souko General"))
        .await
        .unwrap();

    app.clock.advance(chrono::Duration::minutes(6));
    app.state.scheduler.tick().await.unwrap();
    let pending = app
        .queue
        .peek(&app.state.config.metrics_queue)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    // Nobody consumed anything before the next occurrence fires.
    app.clock.advance(chrono::Duration::minutes(6));
    let (outcomes, _) = app.state.scheduler.tick().await.unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, TickOutcome::Suppressed { .. })));
    let pending = app
        .queue
        .peek(&app.state.config.metrics_queue)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    // Once a worker drains the queue, the still-overdue entries go out
    // again on the next pass, one enqueue each.
    while app
        .queue
        .dequeue(&app.state.config.metrics_queue, Duration::from_secs(1))
        .await
        .unwrap()
        .is_some()
    {}
    let (outcomes, _) = app.state.scheduler.tick().await.unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, TickOutcome::Dispatched { .. })));
    let pending = app
        .queue
        .peek(&app.state.config.metrics_queue)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn creating_the_same_store_name_twice_keeps_entries_unique_per_store() {
    let app = TestApp::new().await;
    let first = app
        .state
        .stores
        .create_store(create_request("Souko General"))
        .await
        .unwrap();
    let second = app
        .state
        .stores
        .create_store(create_request("Souko General"))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    let entries = schedule_entry::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    // Two rollup entries per store, keyed by store id in the entry name.
    assert_eq!(entries.len(), 4);
}
