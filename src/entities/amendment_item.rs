use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-asset quantity delta of an addition or reduction amendment.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "amendment_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub amendment_id: Uuid,
    pub asset_type_id: Uuid,
    pub quantity: i32,
    /// For additions, the price of a newly created line; for reductions,
    /// overwritten with the matched line's price when applied.
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub unit_price: Decimal,
    /// Contract line touched when the amendment was applied.
    pub contract_item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::amendment::Entity",
        from = "Column::AmendmentId",
        to = "super::amendment::Column::Id"
    )]
    Amendment,
    #[sea_orm(
        belongs_to = "super::asset_type::Entity",
        from = "Column::AssetTypeId",
        to = "super::asset_type::Column::Id"
    )]
    AssetType,
}

impl Related<super::amendment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Amendment.def()
    }
}

impl Related<super::asset_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetType.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
