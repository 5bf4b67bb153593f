use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_inventory_tables::Lots;
use crate::m20250301_000002_create_contract_tables::ContractItems;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Allocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Allocations::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Allocations::ContractItemId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Allocations::LotId).big_integer().not_null())
                    .col(ColumnDef::new(Allocations::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(Allocations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Allocations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_allocations_contract_item")
                            .from(Allocations::Table, Allocations::ContractItemId)
                            .to(ContractItems::Table, ContractItems::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_allocations_lot")
                            .from(Allocations::Table, Allocations::LotId)
                            .to(Lots::Table, Lots::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_allocations_contract_item")
                    .table(Allocations::Table)
                    .col(Allocations::ContractItemId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_allocations_lot")
                    .table(Allocations::Table)
                    .col(Allocations::LotId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Allocations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Allocations {
    Table,
    Id,
    ContractItemId,
    LotId,
    Quantity,
    CreatedAt,
    UpdatedAt,
}
