// Not every suite uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use storefront_core::{
    clock::{Clock, ManualClock},
    config::AppConfig,
    db,
    entities::{customer, product, stock_lot, store},
    message_queue::InMemoryWorkQueue,
    notifications::testing::RecordingNotificationSender,
    AppState,
};

/// Harness wiring the full service graph onto a fresh in-memory SQLite
/// database with migrations applied, a pinned clock, and an in-memory
/// queue.
pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub notifier: RecordingNotificationSender,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        ));
        let queue = Arc::new(InMemoryWorkQueue::new());
        let notifier = RecordingNotificationSender::default();

        let state = AppState::build_with(
            Arc::new(pool),
            cfg,
            queue.clone(),
            None,
            clock.clone(),
            Arc::new(notifier.clone()),
        );

        Self {
            state,
            clock,
            queue,
            notifier,
        }
    }

    pub async fn seed_store(&self, name: &str) -> store::Model {
        let now = self.clock.now();
        store::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            phone_number: Set(None),
            city: Set(None),
            country: Set("KE".to_string()),
            instagram_handle: Set(None),
            facebook_handle: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed store")
    }

    pub async fn seed_customer(&self, store_id: Uuid, email: &str) -> customer::Model {
        let now = self.clock.now();
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            email: Set(email.to_string()),
            first_name: Set(Some("Asha".to_string())),
            last_name: Set(Some("Mwangi".to_string())),
            phone_number: Set(None),
            city: Set(None),
            country: Set("KE".to_string()),
            address: Set(None),
            comment: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed customer")
    }

    pub async fn seed_product(
        &self,
        store_id: Uuid,
        name: &str,
        buying_price: Decimal,
        selling_price: Decimal,
    ) -> product::Model {
        let now = self.clock.now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(name.to_string()),
            description: Set(None),
            buying_price: Set(buying_price),
            selling_price: Set(selling_price),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_lot(&self, product_id: Uuid, quantity: i32) -> stock_lot::Model {
        let now = self.clock.now();
        stock_lot::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed stock lot")
    }
}
