use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "categories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        super::store_category::Relation::Store.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::store_category::Relation::Category.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
