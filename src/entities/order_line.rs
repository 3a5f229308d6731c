use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One product position on an order, consuming stock from a specific lot.
///
/// `cost` is captured once at creation time (defaulting to
/// `quantity * selling_price`) and is not recomputed when the product price
/// changes later.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub stock_lot_id: Uuid,
    pub quantity: i32,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// What the sold units cost the store to acquire.
    pub fn production_cost(&self, product: &super::product::Model) -> Decimal {
        product.buying_price * Decimal::from(self.quantity)
    }

    pub fn profit(&self, product: &super::product::Model) -> Decimal {
        self.cost - self.production_cost(product)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::stock_lot::Entity",
        from = "Column::StockLotId",
        to = "super::stock_lot::Column::Id"
    )]
    StockLot,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::stock_lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockLot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(buying: Decimal, selling: Decimal) -> super::super::product::Model {
        super::super::product::Model {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            name: "beans".into(),
            description: None,
            buying_price: buying,
            selling_price: selling,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn profit_is_cost_minus_production_cost() {
        let product = product(dec!(4.50), dec!(7.00));
        let line = Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: product.id,
            stock_lot_id: Uuid::new_v4(),
            quantity: 3,
            cost: dec!(21.00),
            created_at: Utc::now(),
            updated_at: None,
        };
        assert_eq!(line.production_cost(&product), dec!(13.50));
        assert_eq!(line.profit(&product), dec!(7.50));
    }
}
