use crate::{
    clock::Clock,
    db::DbPool,
    entities::{
        daily_metric,
        daily_metric::MetricKind,
        order,
        order::PaymentStatus,
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{order_ledger::OrderLedger, stock_ledger::StockLedger},
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Reporting window anchored at "now". All windows are half-open and end at
/// the current instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReportPeriod {
    LastWeek,
    LastMonth,
    LastYear,
    AllTime,
}

impl ReportPeriod {
    /// Parses the wire codes used by report requests.
    pub fn from_code(code: &str) -> Result<Self, ServiceError> {
        match code {
            "last_week" => Ok(Self::LastWeek),
            "last_month" => Ok(Self::LastMonth),
            "last_year" => Ok(Self::LastYear),
            "all_time" => Ok(Self::AllTime),
            other => Err(ServiceError::InvalidPeriod(other.to_string())),
        }
    }

    /// Window start, or `None` for an unbounded window. The year window is
    /// a calendar-year subtraction so it tracks the same date last year;
    /// when that date does not exist (Feb 29) it falls back to 365 days.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::LastWeek => Some(now - Duration::days(7)),
            Self::LastMonth => Some(now - Duration::days(30)),
            Self::LastYear => Some(
                now.with_year(now.year() - 1)
                    .unwrap_or(now - Duration::days(365)),
            ),
            Self::AllTime => None,
        }
    }
}

/// A product ranked by units sold within a reporting window.
#[derive(Debug, Clone)]
pub struct ProductSales {
    pub product: product::Model,
    pub units_sold: i64,
}

/// A product sitting below the restock threshold.
#[derive(Debug, Clone)]
pub struct LowStockProduct {
    pub product: product::Model,
    pub remaining: i64,
}

/// Computes and persists per-store daily rollups, and serves report reads
/// over them. Rollups are idempotent: recomputing a (store, date, kind)
/// bucket overwrites the existing value through an upsert on the unique
/// triple, so a job that fires twice cannot double-count.
#[derive(Clone)]
pub struct MetricsAggregator {
    db: Arc<DbPool>,
    orders: OrderLedger,
    stock: StockLedger,
    event_sender: Option<EventSender>,
    clock: Arc<dyn Clock>,
    low_stock_threshold: i64,
}

impl MetricsAggregator {
    pub fn new(
        db: Arc<DbPool>,
        orders: OrderLedger,
        event_sender: Option<EventSender>,
        clock: Arc<dyn Clock>,
        low_stock_threshold: i64,
    ) -> Self {
        Self {
            stock: StockLedger::new(db.clone()),
            db,
            orders,
            event_sender,
            clock,
            low_stock_threshold,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit metrics event");
            }
        }
    }

    /// Counts the store's confirmed orders created on `date` and upserts
    /// the `orders` bucket.
    #[instrument(skip(self), fields(store_id = %store_id, date = %date))]
    pub async fn aggregate_orders(
        &self,
        store_id: Uuid,
        date: NaiveDate,
    ) -> Result<daily_metric::Model, ServiceError> {
        let (start, end) = day_bounds(date);
        let count = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Confirmed.eq(true))
            .filter(order::Column::CreatedAt.gte(start))
            .filter(order::Column::CreatedAt.lt(end))
            .count(&*self.db)
            .await?;

        self.upsert(store_id, date, MetricKind::Orders, Decimal::from(count))
            .await
    }

    /// Sums the profit of the store's confirmed orders whose `paid_on`
    /// falls on `date` and upserts the `profit` bucket.
    #[instrument(skip(self), fields(store_id = %store_id, date = %date))]
    pub async fn aggregate_profit(
        &self,
        store_id: Uuid,
        date: NaiveDate,
    ) -> Result<daily_metric::Model, ServiceError> {
        let paid_orders = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Confirmed.eq(true))
            .filter(order::Column::PaidOn.eq(date))
            .all(&*self.db)
            .await?;

        let mut profit = Decimal::ZERO;
        for order in &paid_orders {
            profit += self.orders.profit(order.id).await?;
        }

        self.upsert(store_id, date, MetricKind::Profit, profit).await
    }

    /// Writes one (store, date, kind) bucket, overwriting any prior value.
    async fn upsert(
        &self,
        store_id: Uuid,
        date: NaiveDate,
        kind: MetricKind,
        value: Decimal,
    ) -> Result<daily_metric::Model, ServiceError> {
        let now = self.clock.now();
        let model = daily_metric::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            kind: Set(kind.to_string()),
            date: Set(date),
            value: Set(value),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        daily_metric::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    daily_metric::Column::StoreId,
                    daily_metric::Column::Date,
                    daily_metric::Column::Kind,
                ])
                .update_columns([daily_metric::Column::Value, daily_metric::Column::UpdatedAt])
                .to_owned(),
            )
            .exec(&*self.db)
            .await?;

        let stored = daily_metric::Entity::find()
            .filter(daily_metric::Column::StoreId.eq(store_id))
            .filter(daily_metric::Column::Date.eq(date))
            .filter(daily_metric::Column::Kind.eq(kind.to_string()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "metric bucket missing after upsert: {store_id} {date} {kind}"
                ))
            })?;

        info!(store_id = %store_id, date = %date, kind = %kind, value = %value, "metric bucket written");
        self.emit(Event::MetricUpserted {
            store_id,
            date,
            kind: kind.to_string(),
        })
        .await;

        Ok(stored)
    }

    /// Daily buckets of one kind within a period, oldest first.
    pub async fn report(
        &self,
        store_id: Uuid,
        kind: MetricKind,
        period: ReportPeriod,
    ) -> Result<Vec<daily_metric::Model>, ServiceError> {
        let mut query = daily_metric::Entity::find()
            .filter(daily_metric::Column::StoreId.eq(store_id))
            .filter(daily_metric::Column::Kind.eq(kind.to_string()))
            .order_by_asc(daily_metric::Column::Date);
        if let Some(start) = period.start(self.clock.now()) {
            query = query.filter(daily_metric::Column::Date.gte(start.date_naive()));
        }
        Ok(query.all(&*self.db).await?)
    }

    /// Sum of one kind's buckets over a period.
    pub async fn report_total(
        &self,
        store_id: Uuid,
        kind: MetricKind,
        period: ReportPeriod,
    ) -> Result<Decimal, ServiceError> {
        let buckets = self.report(store_id, kind, period).await?;
        Ok(buckets.iter().map(|bucket| bucket.value).sum())
    }

    /// The store's product with the most units sold in the window. Ties go
    /// to the earlier-created product; `None` when nothing sold.
    #[instrument(skip(self), fields(store_id = %store_id))]
    pub async fn best_selling_product(
        &self,
        store_id: Uuid,
        period: ReportPeriod,
    ) -> Result<Option<ProductSales>, ServiceError> {
        let products = product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .order_by_asc(product::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        if products.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let range = period.start(now).map(|start| (start, now));

        let mut best: Option<ProductSales> = None;
        for product in products {
            let units_sold = self.stock.ordered_in_period(product.id, range).await?;
            if units_sold == 0 {
                continue;
            }
            let is_better = match &best {
                Some(current) => units_sold > current.units_sold,
                None => true,
            };
            if is_better {
                best = Some(ProductSales {
                    product,
                    units_sold,
                });
            }
        }
        Ok(best)
    }

    /// Products whose remaining stock across all lots is below the restock
    /// threshold.
    pub async fn low_stock_products(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<LowStockProduct>, ServiceError> {
        let products = product::Entity::find()
            .filter(product::Column::StoreId.eq(store_id))
            .order_by_asc(product::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut low = Vec::new();
        for product in products {
            let remaining = self.stock.total_remaining(product.id).await?;
            if remaining < self.low_stock_threshold {
                low.push(LowStockProduct { product, remaining });
            }
        }
        Ok(low)
    }

    /// Confirmed-order counts per payment status within a period.
    pub async fn order_status_counts(
        &self,
        store_id: Uuid,
        period: ReportPeriod,
    ) -> Result<HashMap<PaymentStatus, u64>, ServiceError> {
        let mut query = order::Entity::find()
            .filter(order::Column::StoreId.eq(store_id))
            .filter(order::Column::Confirmed.eq(true));
        if let Some(start) = period.start(self.clock.now()) {
            query = query.filter(order::Column::CreatedAt.gte(start));
        }

        let mut counts = HashMap::new();
        for order in query.all(&*self.db).await? {
            *counts.entry(order.payment_status()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Current bucket date per the injected clock.
    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    /// Runs both rollups for one store for the current day. This is the
    /// body of the scheduled metrics jobs.
    pub async fn aggregate_today(&self, store_id: Uuid) -> Result<(), ServiceError> {
        let today = self.clock.today();
        self.aggregate_orders(store_id, today).await?;
        self.aggregate_profit(store_id, today).await?;
        Ok(())
    }
}

/// UTC datetime bounds `[midnight, next midnight)` of a calendar date.
fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_codes_parse() {
        assert_eq!(ReportPeriod::from_code("last_week").unwrap(), ReportPeriod::LastWeek);
        assert_eq!(ReportPeriod::from_code("all_time").unwrap(), ReportPeriod::AllTime);
        assert!(matches!(
            ReportPeriod::from_code("fortnight"),
            Err(ServiceError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn year_window_subtracts_a_calendar_year() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let start = ReportPeriod::LastYear.start(now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 3, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn leap_day_year_window_falls_back_to_365_days() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap();
        let start = ReportPeriod::LastYear.start(now).unwrap();
        assert_eq!(start, now - Duration::days(365));
    }

    #[test]
    fn all_time_has_no_lower_bound() {
        assert!(ReportPeriod::AllTime.start(Utc::now()).is_none());
    }

    #[test]
    fn day_bounds_are_half_open() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());
    }
}
