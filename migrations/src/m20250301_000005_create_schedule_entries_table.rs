use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduleEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduleEntries::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduleEntries::StoreId).uuid().null())
                    .col(
                        ColumnDef::new(ScheduleEntries::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ScheduleEntries::Task).string().not_null())
                    .col(ColumnDef::new(ScheduleEntries::Args).json().not_null())
                    .col(ColumnDef::new(ScheduleEntries::CronExpr).string().not_null())
                    .col(
                        ColumnDef::new(ScheduleEntries::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(ScheduleEntries::LastRunAt).timestamp().null())
                    .col(
                        ColumnDef::new(ScheduleEntries::TotalRunCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScheduleEntries::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduleEntries::UpdatedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(ScheduleEntries::Table, ScheduleEntries::StoreId)
                            .to(Stores::Table, Stores::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schedule_entries_enabled")
                    .table(ScheduleEntries::Table)
                    .col(ScheduleEntries::Enabled)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduleEntries::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ScheduleEntries {
    Table,
    Id,
    StoreId,
    Name,
    Task,
    Args,
    CronExpr,
    Enabled,
    LastRunAt,
    TotalRunCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Stores {
    Table,
    Id,
}
