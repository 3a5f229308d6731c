pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_stores_table;
mod m20250301_000002_create_products_table;
mod m20250301_000003_create_orders_table;
mod m20250301_000004_create_daily_metrics_table;
mod m20250301_000005_create_schedule_entries_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_stores_table::Migration),
            Box::new(m20250301_000002_create_products_table::Migration),
            Box::new(m20250301_000003_create_orders_table::Migration),
            Box::new(m20250301_000004_create_daily_metrics_table::Migration),
            Box::new(m20250301_000005_create_schedule_entries_table::Migration),
        ]
    }
}
