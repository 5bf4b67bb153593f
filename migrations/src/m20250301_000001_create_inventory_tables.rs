use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AssetTypes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AssetTypes::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(AssetTypes::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AssetTypes::Name).string_len(120).not_null())
                    .col(
                        ColumnDef::new(AssetTypes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Lots use a sequential key so that FIFO ties on the same acquisition
        // instant still resolve deterministically.
        manager
            .create_table(
                Table::create()
                    .table(Lots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Lots::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Lots::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Lots::AssetTypeId).uuid().not_null())
                    .col(ColumnDef::new(Lots::Code).string_len(64).not_null())
                    .col(ColumnDef::new(Lots::TotalQuantity).integer().not_null())
                    .col(ColumnDef::new(Lots::AvailableQuantity).integer().not_null())
                    .col(ColumnDef::new(Lots::AcquiredOn).date().not_null())
                    .col(
                        ColumnDef::new(Lots::Unavailable)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Lots::Status).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Lots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Lots::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lots_asset_type")
                            .from(Lots::Table, Lots::AssetTypeId)
                            .to(AssetTypes::Table, AssetTypes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_lots_tenant_code")
                    .table(Lots::Table)
                    .col(Lots::TenantId)
                    .col(Lots::Code)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_lots_fifo")
                    .table(Lots::Table)
                    .col(Lots::TenantId)
                    .col(Lots::AssetTypeId)
                    .col(Lots::AcquiredOn)
                    .col(Lots::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Lots::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AssetTypes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum AssetTypes {
    Table,
    Id,
    TenantId,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum Lots {
    Table,
    Id,
    TenantId,
    AssetTypeId,
    Code,
    TotalQuantity,
    AvailableQuantity,
    AcquiredOn,
    Unavailable,
    Status,
    CreatedAt,
    UpdatedAt,
}
