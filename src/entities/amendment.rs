use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four reversible change requests an active contract accepts.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum AmendmentKind {
    #[sea_orm(string_value = "extension")]
    #[strum(serialize = "extension")]
    Extension,
    #[sea_orm(string_value = "addition")]
    #[strum(serialize = "addition")]
    Addition,
    #[sea_orm(string_value = "reduction")]
    #[strum(serialize = "reduction")]
    Reduction,
    #[sea_orm(string_value = "value_change")]
    #[strum(serialize = "value_change")]
    ValueChange,
}

impl AmendmentKind {
    /// Whether the amendment carries per-asset items.
    pub fn has_items(self) -> bool {
        matches!(self, AmendmentKind::Addition | AmendmentKind::Reduction)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum AmendmentStatus {
    #[sea_orm(string_value = "draft")]
    #[strum(serialize = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    #[strum(serialize = "active")]
    Active,
    #[sea_orm(string_value = "canceled")]
    #[strum(serialize = "canceled")]
    Canceled,
}

impl AmendmentStatus {
    pub fn can_transition(from: AmendmentStatus, to: AmendmentStatus) -> bool {
        use AmendmentStatus::*;
        matches!((from, to), (Draft, Active) | (Draft, Canceled) | (Active, Canceled))
    }

    pub fn is_editable(self) -> bool {
        self == AmendmentStatus::Draft
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "amendments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub contract_id: Uuid,
    pub kind: AmendmentKind,
    pub status: AmendmentStatus,
    /// Requested end date (extension only).
    pub new_end_date: Option<NaiveDate>,
    /// Contract end date captured when an extension was applied.
    pub previous_end_date: Option<NaiveDate>,
    /// Signed adjustment (value change only).
    #[sea_orm(column_type = "Decimal(Some((16, 2)))", nullable)]
    pub adjustment_amount: Option<Decimal>,
    /// Contract total captured when a value change was applied.
    #[sea_orm(column_type = "Decimal(Some((16, 2)))", nullable)]
    pub previous_total: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub monthly_delta: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::contract::Entity",
        from = "Column::ContractId",
        to = "super::contract::Column::Id"
    )]
    Contract,
    #[sea_orm(has_many = "super::amendment_item::Entity")]
    AmendmentItems,
}

impl Related<super::contract::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contract.def()
    }
}

impl Related<super::amendment_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AmendmentItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
