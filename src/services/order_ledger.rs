use crate::{
    clock::Clock,
    db::DbPool,
    entities::{
        customer, order,
        order::PaymentStatus,
        order_line, payment, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::NotificationSender,
    services::stock_ledger::StockLedger,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub store_id: Uuid,
    pub customer_id: Uuid,
    pub delivery_fee: Option<Decimal>,
    /// Defaults to confirmed; unconfirmed orders are excluded from metrics.
    pub confirmed: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateLineRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    /// Explicit cost; when absent (or zero) the line captures
    /// `quantity * selling_price` at creation time.
    pub cost: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateLineRequest {
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: Option<i32>,
    pub cost: Option<Decimal>,
}

/// Derived financial view of one order, recomputed from current children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance: Decimal,
    pub profit: Decimal,
    pub payment_status: PaymentStatus,
}

/// Write-side of the order model. All mutations of one order's lines and
/// payments are serialized through a per-order lock so stock headroom checks
/// cannot race; mutations on different orders proceed concurrently. The
/// order row carries a version column as a cross-instance optimistic guard.
#[derive(Clone)]
pub struct OrderLedger {
    db: Arc<DbPool>,
    stock: StockLedger,
    event_sender: Option<EventSender>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    order_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLedger {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<EventSender>,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stock: StockLedger::new(db.clone()),
            db,
            event_sender,
            notifier,
            clock,
            order_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolves which order's lock covers a line. The owning order never
    /// changes, so this read is safe to take before the lock; every other
    /// line field must be re-read under it.
    async fn order_id_of_line(&self, line_id: Uuid) -> Result<Uuid, ServiceError> {
        let line = order_line::Entity::find_by_id(line_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("order line", line_id))?;
        Ok(line.order_id)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to emit ledger event");
            }
        }
    }

    #[instrument(skip(self, request), fields(store_id = %request.store_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let now = self.clock.now();
        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(request.store_id),
            customer_id: Set(request.customer_id),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            paid_on: Set(None),
            delivery_fee: Set(request.delivery_fee.unwrap_or(Decimal::ZERO)),
            confirmed: Set(request.confirmed.unwrap_or(true)),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let created = model.insert(&*self.db).await?;
        self.emit(Event::OrderCreated(created.id)).await;
        Ok(created)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", order_id))
    }

    /// Adds a line to an order, consuming stock from the product's active
    /// lot. Fails with `InsufficientStock` when the lot cannot cover the
    /// quantity; nothing is written in that case.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, product_id = %request.product_id))]
    pub async fn create_line(
        &self,
        request: CreateLineRequest,
    ) -> Result<order_line::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let lock = self.lock_for(request.order_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(request.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", request.order_id))?;

        let product = product::Entity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("product", request.product_id))?;

        let lot = self
            .stock
            .pick_active_lot_on(&txn, product.id)
            .await?
            .ok_or(ServiceError::InsufficientStock {
                requested: i64::from(request.quantity),
                available: 0,
            })?;

        let available = self.stock.remaining_on(&txn, &lot).await?;
        if i64::from(request.quantity) > available {
            return Err(ServiceError::InsufficientStock {
                requested: i64::from(request.quantity),
                available,
            });
        }

        let now = self.clock.now();
        let line = order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            stock_lot_id: Set(lot.id),
            quantity: Set(request.quantity),
            cost: Set(line_cost(
                request.cost,
                request.quantity,
                product.selling_price,
            )),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        self.touch_order(&txn, &order).await?;
        txn.commit().await?;

        self.emit(Event::OrderLineAdded {
            order_id: order.id,
            line_id: line.id,
            quantity: line.quantity,
        })
        .await;

        Ok(line)
    }

    /// Edits a line's quantity and/or cost. The headroom test adds the
    /// line's own prior consumption back before checking, so shrinking or
    /// keeping the quantity always passes. Cost is only overwritten when
    /// explicitly supplied; a quantity-only edit keeps the captured cost.
    #[instrument(skip(self, request), fields(line_id = %line_id))]
    pub async fn update_line(
        &self,
        line_id: Uuid,
        request: UpdateLineRequest,
    ) -> Result<order_line::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order_id = self.order_id_of_line(line_id).await?;
        let lock = self.lock_for(order_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        // The pre-lock read only located the order; a writer that held the
        // lock may have changed the line since, so the headroom math works
        // on a fresh row.
        let line = order_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order line", line_id))?;

        let order = order::Entity::find_by_id(line.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", line.order_id))?;

        let mut active: order_line::ActiveModel = line.clone().into();

        if let Some(new_quantity) = request.quantity {
            let lot = self
                .stock
                .lots_for_product_on(&txn, line.product_id)
                .await?
                .into_iter()
                .find(|lot| lot.id == line.stock_lot_id)
                .ok_or_else(|| ServiceError::not_found("stock lot", line.stock_lot_id))?;

            let headroom =
                self.stock.remaining_on(&txn, &lot).await? + i64::from(line.quantity);
            if i64::from(new_quantity) > headroom {
                return Err(ServiceError::InsufficientStock {
                    requested: i64::from(new_quantity),
                    available: headroom,
                });
            }
            active.quantity = Set(new_quantity);
        }

        if let Some(cost) = request.cost {
            active.cost = Set(cost);
        }
        active.updated_at = Set(Some(self.clock.now()));

        let updated = active.update(&txn).await?;
        self.touch_order(&txn, &order).await?;
        txn.commit().await?;

        self.emit(Event::OrderLineUpdated {
            order_id: updated.order_id,
            line_id: updated.id,
        })
        .await;

        Ok(updated)
    }

    /// Removes a line, returning its consumption to the lot.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn delete_line(&self, line_id: Uuid) -> Result<(), ServiceError> {
        let order_id = self.order_id_of_line(line_id).await?;
        let lock = self.lock_for(order_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;
        let line = order_line::Entity::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order line", line_id))?;
        let order = order::Entity::find_by_id(line.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", line.order_id))?;

        order_line::Entity::delete_by_id(line.id).exec(&txn).await?;
        self.touch_order(&txn, &order).await?;
        txn.commit().await?;

        self.emit(Event::OrderLineRemoved {
            order_id: line.order_id,
            line_id: line.id,
        })
        .await;

        Ok(())
    }

    /// Records a payment and transitions the order's payment status in the
    /// same transaction. `balance <= 0` marks the order PAID and stamps
    /// `paid_on`; otherwise the order becomes PARTIALLY_PAID. The transition
    /// never reverts a PAID order.
    #[instrument(skip(self), fields(order_id = %order_id, amount = %amount))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<payment::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }

        let lock = self.lock_for(order_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", order_id))?;

        let now = self.clock.now();
        let recorded = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            amount: Set(amount),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let total = self.total_on(&txn, order.id).await?;
        let paid = self.amount_paid_on(&txn, order.id).await?;
        let balance = total - paid;

        let previous_status = order.payment_status();
        let (status, paid_on) = if balance <= Decimal::ZERO {
            (PaymentStatus::Paid, Some(self.clock.today()))
        } else if previous_status == PaymentStatus::Paid {
            // One-directional: a correction that reopens a balance does not
            // demote the order.
            (PaymentStatus::Paid, order.paid_on)
        } else {
            (PaymentStatus::PartiallyPaid, order.paid_on)
        };

        let updated = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(status.to_string()))
            .col_expr(order::Column::PaidOn, Expr::value(paid_on))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::Conflict(order.id));
        }

        txn.commit().await?;

        self.emit(Event::PaymentRecorded {
            order_id: order.id,
            payment_id: recorded.id,
            amount,
        })
        .await;

        if status == PaymentStatus::Paid && previous_status != PaymentStatus::Paid {
            let paid_on = paid_on.unwrap_or_else(|| self.clock.today());
            self.emit(Event::OrderPaid {
                order_id: order.id,
                paid_on,
            })
            .await;
            self.notify_order_paid(&order).await;
        }

        Ok(recorded)
    }

    async fn notify_order_paid(&self, order: &order::Model) {
        match customer::Entity::find_by_id(order.customer_id)
            .one(&*self.db)
            .await
        {
            Ok(Some(customer)) => {
                self.notifier
                    .notify(
                        &customer.email,
                        "order_paid",
                        serde_json::json!({
                            "order_id": order.id,
                            "customer_name": customer.full_name(),
                        }),
                    )
                    .await;
            }
            Ok(None) => warn!(order_id = %order.id, "order customer missing, skipping notification"),
            Err(e) => warn!(error = %e, order_id = %order.id, "failed to load customer for notification"),
        }
    }

    /// Bumps the parent order's version inside the mutation transaction so
    /// concurrent writers from another instance surface as conflicts.
    async fn touch_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
    ) -> Result<(), ServiceError> {
        let updated = order::Entity::update_many()
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(self.clock.now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(conn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::Conflict(order.id));
        }
        Ok(())
    }

    pub async fn total(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        self.total_on(&*self.db, order_id).await
    }

    async fn total_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        Ok(lines.iter().map(|line| line.cost).sum())
    }

    pub async fn amount_paid(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        self.amount_paid_on(&*self.db, order_id).await
    }

    async fn amount_paid_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        Ok(payments.iter().map(|p| p.amount).sum())
    }

    pub async fn balance(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        Ok(self.total(order_id).await? - self.amount_paid(order_id).await?)
    }

    /// Profit over the order's lines, each against its product's buying
    /// price.
    pub async fn profit(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        self.profit_on(&*self.db, order_id).await
    }

    pub(crate) async fn profit_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        if lines.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut profit = Decimal::ZERO;
        for line in &lines {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| ServiceError::not_found("product", line.product_id))?;
            profit += line.profit(product);
        }
        Ok(profit)
    }

    /// All derived financial fields of an order in one read.
    pub async fn summary(&self, order_id: Uuid) -> Result<OrderSummary, ServiceError> {
        let order = self.get_order(order_id).await?;
        let total = self.total(order_id).await?;
        let amount_paid = self.amount_paid(order_id).await?;
        Ok(OrderSummary {
            order_id,
            total,
            amount_paid,
            balance: total - amount_paid,
            profit: self.profit(order_id).await?,
            payment_status: order.payment_status(),
        })
    }
}

/// Cost captured on a new line: the explicit cost when supplied and
/// nonzero, otherwise `quantity * selling_price` at creation time.
fn line_cost(requested: Option<Decimal>, quantity: i32, selling_price: Decimal) -> Decimal {
    match requested {
        Some(cost) if cost != Decimal::ZERO => cost,
        _ => selling_price * Decimal::from(quantity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn explicit_cost_wins() {
        assert_eq!(line_cost(Some(dec!(12.50)), 3, dec!(7.00)), dec!(12.50));
    }

    #[test]
    fn omitted_cost_captures_selling_price() {
        assert_eq!(line_cost(None, 3, dec!(7.00)), dec!(21.00));
    }

    #[test]
    fn zero_cost_is_treated_as_omitted() {
        assert_eq!(line_cost(Some(Decimal::ZERO), 2, dec!(5.00)), dec!(10.00));
    }
}
