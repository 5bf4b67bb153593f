use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_inventory_tables::AssetTypes;
use crate::m20250301_000002_create_contract_tables::Contracts;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Amendments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Amendments::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Amendments::ContractId).uuid().not_null())
                    .col(ColumnDef::new(Amendments::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(Amendments::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Amendments::NewEndDate).date().null())
                    .col(ColumnDef::new(Amendments::PreviousEndDate).date().null())
                    .col(
                        ColumnDef::new(Amendments::AdjustmentAmount)
                            .decimal_len(16, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Amendments::PreviousTotal)
                            .decimal_len(16, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Amendments::MonthlyDelta)
                            .decimal_len(16, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Amendments::Notes).text().null())
                    .col(
                        ColumnDef::new(Amendments::AppliedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Amendments::CanceledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Amendments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Amendments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_amendments_contract")
                            .from(Amendments::Table, Amendments::ContractId)
                            .to(Contracts::Table, Contracts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AmendmentItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AmendmentItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AmendmentItems::AmendmentId).uuid().not_null())
                    .col(ColumnDef::new(AmendmentItems::AssetTypeId).uuid().not_null())
                    .col(ColumnDef::new(AmendmentItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(AmendmentItems::UnitPrice)
                            .decimal_len(16, 2)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AmendmentItems::ContractItemId).uuid().null())
                    .col(
                        ColumnDef::new(AmendmentItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_amendment_items_amendment")
                            .from(AmendmentItems::Table, AmendmentItems::AmendmentId)
                            .to(Amendments::Table, Amendments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_amendment_items_asset_type")
                            .from(AmendmentItems::Table, AmendmentItems::AssetTypeId)
                            .to(AssetTypes::Table, AssetTypes::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AmendmentItems::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Amendments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Amendments {
    Table,
    Id,
    ContractId,
    Kind,
    Status,
    NewEndDate,
    PreviousEndDate,
    AdjustmentAmount,
    PreviousTotal,
    MonthlyDelta,
    Notes,
    AppliedAt,
    CanceledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AmendmentItems {
    Table,
    Id,
    AmendmentId,
    AssetTypeId,
    Quantity,
    UnitPrice,
    ContractItemId,
    CreatedAt,
}
