use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Stores::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Stores::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Stores::Name).string().not_null())
                    .col(ColumnDef::new(Stores::PhoneNumber).string().null())
                    .col(ColumnDef::new(Stores::City).string().null())
                    .col(
                        ColumnDef::new(Stores::Country)
                            .string()
                            .not_null()
                            .default("GH"),
                    )
                    .col(ColumnDef::new(Stores::InstagramHandle).string().null())
                    .col(ColumnDef::new(Stores::FacebookHandle).string().null())
                    .col(ColumnDef::new(Stores::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Stores::UpdatedAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Categories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Categories::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Categories::Name).string().not_null())
                    .col(ColumnDef::new(Categories::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StoreCategories::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(StoreCategories::StoreId).uuid().not_null())
                    .col(
                        ColumnDef::new(StoreCategories::CategoryId)
                            .uuid()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(StoreCategories::StoreId)
                            .col(StoreCategories::CategoryId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(StoreCategories::Table, StoreCategories::StoreId)
                            .to(Stores::Table, Stores::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(StoreCategories::Table, StoreCategories::CategoryId)
                            .to(Categories::Table, Categories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Customers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Customers::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Customers::StoreId).uuid().not_null())
                    .col(
                        ColumnDef::new(Customers::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Customers::FirstName).string().null())
                    .col(ColumnDef::new(Customers::LastName).string().null())
                    .col(ColumnDef::new(Customers::PhoneNumber).string().null())
                    .col(ColumnDef::new(Customers::City).string().null())
                    .col(
                        ColumnDef::new(Customers::Country)
                            .string()
                            .not_null()
                            .default("GH"),
                    )
                    .col(ColumnDef::new(Customers::Address).string().null())
                    .col(ColumnDef::new(Customers::Comment).text().null())
                    .col(ColumnDef::new(Customers::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Customers::UpdatedAt).timestamp().null())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Customers::Table, Customers::StoreId)
                            .to(Stores::Table, Stores::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Customers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StoreCategories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Categories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Stores::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Stores {
    Table,
    Id,
    Name,
    PhoneNumber,
    City,
    Country,
    InstagramHandle,
    FacebookHandle,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Categories {
    Table,
    Id,
    Name,
    CreatedAt,
}

#[derive(Iden)]
enum StoreCategories {
    Table,
    StoreId,
    CategoryId,
}

#[derive(Iden)]
enum Customers {
    Table,
    Id,
    StoreId,
    Email,
    FirstName,
    LastName,
    PhoneNumber,
    City,
    Country,
    Address,
    Comment,
    CreatedAt,
    UpdatedAt,
}
