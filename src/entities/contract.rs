use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a rental contract.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[sea_orm(string_value = "draft")]
    #[strum(serialize = "draft")]
    Draft,
    #[sea_orm(string_value = "awaiting_payment")]
    #[strum(serialize = "awaiting_payment")]
    AwaitingPayment,
    #[sea_orm(string_value = "active")]
    #[strum(serialize = "active")]
    Active,
    #[sea_orm(string_value = "finalized")]
    #[strum(serialize = "finalized")]
    Finalized,
    #[sea_orm(string_value = "canceled")]
    #[strum(serialize = "canceled")]
    Canceled,
}

impl ContractStatus {
    /// Transition table for contracts.
    pub fn can_transition(from: ContractStatus, to: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (from, to),
            (Draft, AwaitingPayment)
                | (Draft, Active)
                | (Draft, Canceled)
                | (AwaitingPayment, Active)
                | (AwaitingPayment, Canceled)
                | (Active, Finalized)
                | (Active, Canceled)
        )
    }

    pub fn is_editable(self) -> bool {
        self == ContractStatus::Draft
    }

    /// Whether inventory is committed to the contract in this state.
    pub fn holds_inventory(self) -> bool {
        matches!(
            self,
            ContractStatus::AwaitingPayment | ContractStatus::Active
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub status: ContractStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub items_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub adjustment_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub total_value: Decimal,
    pub requires_upfront_payment: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::contract_item::Entity")]
    ContractItems,
    #[sea_orm(has_many = "super::amendment::Entity")]
    Amendments,
}

impl Related<super::contract_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContractItems.def()
    }
}

impl Related<super::amendment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Amendments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
