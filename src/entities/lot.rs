use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Informational lot status. Allocation eligibility is decided by
/// `unavailable` and `available_quantity`, never by this column.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    #[sea_orm(string_value = "available")]
    #[strum(serialize = "available")]
    Available,
    #[sea_orm(string_value = "unavailable")]
    #[strum(serialize = "unavailable")]
    Unavailable,
    #[sea_orm(string_value = "exhausted")]
    #[strum(serialize = "exhausted")]
    Exhausted,
}

impl LotStatus {
    /// Derives the informational status from the mutable lot fields.
    pub fn derive(unavailable: bool, available_quantity: i32) -> Self {
        if unavailable {
            LotStatus::Unavailable
        } else if available_quantity == 0 {
            LotStatus::Exhausted
        } else {
            LotStatus::Available
        }
    }
}

/// A batch of identical units acquired together.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub tenant_id: Uuid,
    pub asset_type_id: Uuid,
    pub code: String,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub acquired_on: NaiveDate,
    pub unavailable: bool,
    pub status: LotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Units currently committed to line items.
    pub fn allocated_quantity(&self) -> i32 {
        self.total_quantity - self.available_quantity
    }

    pub fn is_eligible(&self) -> bool {
        !self.unavailable && self.available_quantity > 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset_type::Entity",
        from = "Column::AssetTypeId",
        to = "super::asset_type::Column::Id"
    )]
    AssetType,
    #[sea_orm(has_many = "super::allocation::Entity")]
    Allocations,
}

impl Related<super::asset_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssetType.def()
    }
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_flag_then_quantity() {
        assert_eq!(LotStatus::derive(true, 10), LotStatus::Unavailable);
        assert_eq!(LotStatus::derive(true, 0), LotStatus::Unavailable);
        assert_eq!(LotStatus::derive(false, 0), LotStatus::Exhausted);
        assert_eq!(LotStatus::derive(false, 3), LotStatus::Available);
    }

    #[test]
    fn status_display_matches_stored_value() {
        assert_eq!(LotStatus::Exhausted.to_string(), "exhausted");
    }
}
