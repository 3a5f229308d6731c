use crate::{
    db::DbPool,
    entities::{customer, order, order_line, product},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    pub store_id: Uuid,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    pub address: Option<String>,
    pub comment: Option<String>,
}

/// Customer lifecycle and purchase-history reads. History only counts
/// confirmed orders, matching the metric rollups.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DbPool>,
}

impl CustomerService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(store_id = %request.store_id))]
    pub async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let now = Utc::now();
        let created = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(request.store_id),
            email: Set(request.email),
            first_name: Set(request.first_name),
            last_name: Set(request.last_name),
            phone_number: Set(request.phone_number),
            city: Set(request.city),
            country: Set(request.country),
            address: Set(request.address),
            comment: Set(request.comment),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await?;
        Ok(created)
    }

    pub async fn get_customer(&self, customer_id: Uuid) -> Result<customer::Model, ServiceError> {
        customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("customer", customer_id))
    }

    pub async fn list_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<customer::Model>, ServiceError> {
        let customers = customer::Entity::find()
            .filter(customer::Column::StoreId.eq(store_id))
            .order_by_asc(customer::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(customers)
    }

    /// Number of confirmed orders the customer has placed.
    pub async fn order_count(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        let orders = self.confirmed_orders(customer_id).await?;
        Ok(orders.len() as u64)
    }

    /// Distinct products the customer has bought, in first-purchase order.
    pub async fn ordered_products(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let orders = self.confirmed_orders(customer_id).await?;
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_line::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut seen = HashSet::new();
        let mut product_ids = Vec::new();
        for line in &lines {
            if seen.insert(line.product_id) {
                product_ids.push(line.product_id);
            }
        }

        let mut products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(&*self.db)
            .await?;
        products.sort_by_key(|p| product_ids.iter().position(|id| *id == p.id));
        Ok(products)
    }

    /// How many of the customer's confirmed orders include this product.
    pub async fn product_order_count(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let orders = self.confirmed_orders(customer_id).await?;
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        if order_ids.is_empty() {
            return Ok(0);
        }

        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.is_in(order_ids))
            .filter(order_line::Column::ProductId.eq(product_id))
            .all(&*self.db)
            .await?;

        let distinct_orders: HashSet<Uuid> = lines.iter().map(|line| line.order_id).collect();
        Ok(distinct_orders.len() as u64)
    }

    async fn confirmed_orders(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Confirmed.eq(true))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }
}
