use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// One aggregated value per (store, date, kind). The unique index on that
/// triple makes recomputation an overwrite, never a duplicate row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "daily_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub kind: String,
    pub date: NaiveDate,
    pub value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Count of confirmed orders created on the bucket date.
    Orders,
    /// Summed profit of confirmed orders paid on the bucket date.
    Profit,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_kind_storage_form() {
        assert_eq!(MetricKind::Orders.to_string(), "orders");
        assert_eq!(MetricKind::Profit.to_string(), "profit");
        assert_eq!("profit".parse::<MetricKind>().unwrap(), MetricKind::Profit);
    }
}
