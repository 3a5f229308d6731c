use crate::{
    db::DbPool,
    entities::{order_line, stock_lot},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Half-open datetime window `[start, end)` used for period-scoped sums.
pub type DateTimeRange = (DateTime<Utc>, DateTime<Utc>);

/// Pure read-side of the stock model: remaining and ordered quantities are
/// derived from the order lines consuming each lot, never stored.
/// Sufficiency is enforced by the order ledger, not here.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DbPool>,
}

impl StockLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// All lots of a product in creation order (oldest first).
    pub async fn lots_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<stock_lot::Model>, ServiceError> {
        self.lots_for_product_on(&*self.db, product_id).await
    }

    pub(crate) async fn lots_for_product_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<Vec<stock_lot::Model>, ServiceError> {
        let lots = stock_lot::Entity::find()
            .filter(stock_lot::Column::ProductId.eq(product_id))
            .order_by_asc(stock_lot::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(lots)
    }

    /// Units of a lot consumed by order lines, optionally bounded to a
    /// half-open creation-time window.
    pub async fn ordered(
        &self,
        lot_id: Uuid,
        range: Option<DateTimeRange>,
    ) -> Result<i64, ServiceError> {
        self.ordered_on(&*self.db, lot_id, range).await
    }

    pub(crate) async fn ordered_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        lot_id: Uuid,
        range: Option<DateTimeRange>,
    ) -> Result<i64, ServiceError> {
        let mut query = order_line::Entity::find().filter(order_line::Column::StockLotId.eq(lot_id));
        if let Some((start, end)) = range {
            query = query
                .filter(order_line::Column::CreatedAt.gte(start))
                .filter(order_line::Column::CreatedAt.lt(end));
        }
        let lines = query.all(conn).await?;
        Ok(lines.iter().map(|line| i64::from(line.quantity)).sum())
    }

    /// `quantity - ordered` for one lot.
    pub async fn remaining(&self, lot: &stock_lot::Model) -> Result<i64, ServiceError> {
        self.remaining_on(&*self.db, lot).await
    }

    pub(crate) async fn remaining_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        lot: &stock_lot::Model,
    ) -> Result<i64, ServiceError> {
        let ordered = self.ordered_on(conn, lot.id, None).await?;
        Ok(i64::from(lot.quantity) - ordered)
    }

    /// The lot new consumption should draw from: the first lot in creation
    /// order with headroom left. When every lot is exhausted the oldest lot
    /// with nonzero received quantity is returned as a sentinel so callers
    /// still get a lot reference; the headroom check downstream rejects the
    /// actual consumption. `None` only when the product has no usable lot.
    #[instrument(skip(self))]
    pub async fn pick_active_lot(
        &self,
        product_id: Uuid,
    ) -> Result<Option<stock_lot::Model>, ServiceError> {
        self.pick_active_lot_on(&*self.db, product_id).await
    }

    pub(crate) async fn pick_active_lot_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<Option<stock_lot::Model>, ServiceError> {
        let lots = self.lots_for_product_on(conn, product_id).await?;

        for lot in &lots {
            if self.remaining_on(conn, lot).await? > 0 {
                return Ok(Some(lot.clone()));
            }
        }

        Ok(lots.into_iter().find(|lot| lot.quantity > 0))
    }

    /// Remaining units summed over every lot of the product.
    pub async fn total_remaining(&self, product_id: Uuid) -> Result<i64, ServiceError> {
        let lots = self.lots_for_product(product_id).await?;
        let mut total = 0;
        for lot in &lots {
            total += self.remaining(lot).await?;
        }
        Ok(total)
    }

    /// Units of a product ordered within a window, across all its lots.
    pub async fn ordered_in_period(
        &self,
        product_id: Uuid,
        range: Option<DateTimeRange>,
    ) -> Result<i64, ServiceError> {
        let mut query =
            order_line::Entity::find().filter(order_line::Column::ProductId.eq(product_id));
        if let Some((start, end)) = range {
            query = query
                .filter(order_line::Column::CreatedAt.gte(start))
                .filter(order_line::Column::CreatedAt.lt(end));
        }
        let lines = query.all(&*self.db).await?;
        Ok(lines.iter().map(|line| i64::from(line.quantity)).sum())
    }
}
