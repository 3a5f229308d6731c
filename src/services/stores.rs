use crate::{
    db::DbPool,
    entities::{category, store, store_category},
    errors::ServiceError,
    events::{Event, EventSender},
    scheduler::DuplicateSuppressingScheduler,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateStoreRequest {
    #[validate(length(min = 1, message = "Store name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub instagram_handle: Option<String>,
    pub facebook_handle: Option<String>,
    /// Categories the store sells in, linked at creation.
    #[serde(default)]
    pub category_ids: Vec<Uuid>,
}

/// Store lifecycle. Creating a store also registers its recurring metrics
/// jobs with the scheduler, so rollups start without manual setup.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<DbPool>,
    scheduler: Arc<DuplicateSuppressingScheduler>,
    event_sender: Option<EventSender>,
    metrics_cron: String,
}

impl StoreService {
    pub fn new(
        db: Arc<DbPool>,
        scheduler: Arc<DuplicateSuppressingScheduler>,
        event_sender: Option<EventSender>,
        metrics_cron: impl Into<String>,
    ) -> Self {
        Self {
            db,
            scheduler,
            event_sender,
            metrics_cron: metrics_cron.into(),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_store(
        &self,
        request: CreateStoreRequest,
    ) -> Result<store::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let now = Utc::now();
        let created = store::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            phone_number: Set(request.phone_number),
            city: Set(request.city),
            country: Set(request.country),
            instagram_handle: Set(request.instagram_handle),
            facebook_handle: Set(request.facebook_handle),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;

        for category_id in request.category_ids {
            self.link_category(created.id, category_id).await?;
        }

        self.scheduler
            .register_store_jobs(created.id, &self.metrics_cron)
            .await?;

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::StoreCreated(created.id)).await {
                warn!(error = %e, "failed to emit store event");
            }
        }

        Ok(created)
    }

    pub async fn get_store(&self, store_id: Uuid) -> Result<store::Model, ServiceError> {
        store::Entity::find_by_id(store_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("store", store_id))
    }

    pub async fn list_stores(&self) -> Result<Vec<store::Model>, ServiceError> {
        let stores = store::Entity::find()
            .order_by_asc(store::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(stores)
    }

    /// Deletes the store; children and its schedule entries go with it via
    /// the cascading foreign keys.
    #[instrument(skip(self))]
    pub async fn delete_store(&self, store_id: Uuid) -> Result<(), ServiceError> {
        let result = store::Entity::delete_by_id(store_id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("store", store_id));
        }
        Ok(())
    }

    pub async fn link_category(
        &self,
        store_id: Uuid,
        category_id: Uuid,
    ) -> Result<(), ServiceError> {
        category::Entity::find_by_id(category_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("category", category_id))?;

        let existing = store_category::Entity::find()
            .filter(store_category::Column::StoreId.eq(store_id))
            .filter(store_category::Column::CategoryId.eq(category_id))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        store_category::ActiveModel {
            store_id: Set(store_id),
            category_id: Set(category_id),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn categories(&self, store_id: Uuid) -> Result<Vec<category::Model>, ServiceError> {
        let store = self.get_store(store_id).await?;
        let categories = store
            .find_related(category::Entity)
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(categories)
    }

    pub async fn create_category(&self, name: String) -> Result<category::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Category name is required".to_string(),
            ));
        }
        let created = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(created)
    }
}
