use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_inventory_tables::AssetTypes;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contracts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contracts::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Contracts::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Contracts::Code).string_len(64).not_null())
                    .col(ColumnDef::new(Contracts::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Contracts::StartDate).date().not_null())
                    .col(ColumnDef::new(Contracts::EndDate).date().not_null())
                    .col(
                        ColumnDef::new(Contracts::ItemsTotal)
                            .decimal_len(16, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Contracts::AdjustmentTotal)
                            .decimal_len(16, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Contracts::TotalValue)
                            .decimal_len(16, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Contracts::RequiresUpfrontPayment)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Contracts::ActivatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Contracts::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Contracts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Contracts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ContractItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContractItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ContractItems::ContractId).uuid().not_null())
                    .col(ColumnDef::new(ContractItems::AssetTypeId).uuid().not_null())
                    .col(ColumnDef::new(ContractItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(ContractItems::UnitPrice)
                            .decimal_len(16, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContractItems::LineTotal)
                            .decimal_len(16, 2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContractItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContractItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contract_items_contract")
                            .from(ContractItems::Table, ContractItems::ContractId)
                            .to(Contracts::Table, Contracts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contract_items_asset_type")
                            .from(ContractItems::Table, ContractItems::AssetTypeId)
                            .to(AssetTypes::Table, AssetTypes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contract_items_contract")
                    .table(ContractItems::Table)
                    .col(ContractItems::ContractId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ContractItems::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Contracts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Contracts {
    Table,
    Id,
    TenantId,
    Code,
    Status,
    StartDate,
    EndDate,
    ItemsTotal,
    AdjustmentTotal,
    TotalValue,
    RequiresUpfrontPayment,
    ActivatedAt,
    ClosedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum ContractItems {
    Table,
    Id,
    ContractId,
    AssetTypeId,
    Quantity,
    UnitPrice,
    LineTotal,
    CreatedAt,
    UpdatedAt,
}
