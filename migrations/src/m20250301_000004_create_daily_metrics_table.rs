use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DailyMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DailyMetrics::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DailyMetrics::StoreId).uuid().not_null())
                    .col(ColumnDef::new(DailyMetrics::Kind).string().not_null())
                    .col(ColumnDef::new(DailyMetrics::Date).date().not_null())
                    .col(
                        ColumnDef::new(DailyMetrics::Value)
                            .decimal()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(DailyMetrics::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DailyMetrics::UpdatedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(DailyMetrics::Table, DailyMetrics::StoreId)
                            .to(Stores::Table, Stores::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Rollups are upserted against this key; recomputation must overwrite,
        // never append a second row for the same day.
        manager
            .create_index(
                Index::create()
                    .name("uq_daily_metrics_store_date_kind")
                    .table(DailyMetrics::Table)
                    .col(DailyMetrics::StoreId)
                    .col(DailyMetrics::Date)
                    .col(DailyMetrics::Kind)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DailyMetrics::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DailyMetrics {
    Table,
    Id,
    StoreId,
    Kind,
    Date,
    Value,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Stores {
    Table,
    Id,
}
