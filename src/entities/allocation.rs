use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger fact: `quantity` units of `lot_id` are committed to `contract_item_id`.
///
/// The sequential `id` doubles as allocation recency; LIFO release walks
/// records by descending id.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub contract_item_id: Uuid,
    pub lot_id: i64,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::LotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
    #[sea_orm(
        belongs_to = "super::contract_item::Entity",
        from = "Column::ContractItemId",
        to = "super::contract_item::Column::Id"
    )]
    ContractItem,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl Related<super::contract_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContractItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
