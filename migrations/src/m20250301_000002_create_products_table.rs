use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Products::StoreId).uuid().not_null())
                    .col(ColumnDef::new(Products::Name).string().not_null())
                    .col(ColumnDef::new(Products::Description).text().null())
                    .col(
                        ColumnDef::new(Products::BuyingPrice)
                            .decimal()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Products::SellingPrice)
                            .decimal()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Products::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Products::UpdatedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Products::Table, Products::StoreId)
                            .to(Stores::Table, Stores::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_store_created")
                    .table(Products::Table)
                    .col(Products::StoreId)
                    .col(Products::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Stock arrives in append-only lots; consumption is tracked per lot.
        manager
            .create_table(
                Table::create()
                    .table(StockLots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockLots::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockLots::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(StockLots::Quantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(StockLots::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(StockLots::UpdatedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(StockLots::Table, StockLots::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_lots_product_created")
                    .table(StockLots::Table)
                    .col(StockLots::ProductId)
                    .col(StockLots::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockLots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Products {
    Table,
    Id,
    StoreId,
    Name,
    Description,
    BuyingPrice,
    SellingPrice,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum StockLots {
    Table,
    Id,
    ProductId,
    Quantity,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Stores {
    Table,
    Id,
}
