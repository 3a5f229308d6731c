use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stores")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub phone_number: Option<String>,
    pub city: Option<String>,
    pub country: String,
    pub instagram_handle: Option<String>,
    pub facebook_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product::Entity")]
    Products,
    #[sea_orm(has_many = "super::customer::Entity")]
    Customers,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
    #[sea_orm(has_many = "super::daily_metric::Entity")]
    DailyMetrics,
    #[sea_orm(has_many = "super::schedule_entry::Entity")]
    ScheduleEntries,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customers.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::daily_metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DailyMetrics.def()
    }
}

impl Related<super::schedule_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduleEntries.def()
    }
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        super::store_category::Relation::Category.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::store_category::Relation::Store.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
