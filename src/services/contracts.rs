//! Contract Service
//!
//! Drafts contracts and sequences allocator and releaser calls across the
//! contract lifecycle. Every state change runs in one transaction together
//! with its inventory effects.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::{
    asset_type::Entity as AssetTypeEntity,
    contract::{self, ContractStatus, Entity as ContractEntity},
    contract_item::{self, Entity as ContractItemEntity},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ALLOCATED_UNITS, ALLOCATIONS};
use crate::services::{allocation, pricing, release, MAX_QUANTITY};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateContractInput {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddItemInput {
    pub asset_type_id: Uuid,
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub quantity: i32,
    /// Daily rental rate per unit.
    #[validate(custom = "validate_price")]
    pub unit_price: Decimal,
}

pub(crate) fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

/// Locks a contract row for the rest of the transaction.
pub(crate) async fn lock_contract<C: ConnectionTrait>(
    conn: &C,
    contract_id: Uuid,
) -> Result<contract::Model, ServiceError> {
    ContractEntity::find_by_id(contract_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Contract {}", contract_id)))
}

/// Line items of a contract in creation order.
pub(crate) async fn contract_items<C: ConnectionTrait>(
    conn: &C,
    contract_id: Uuid,
) -> Result<Vec<contract_item::Model>, ServiceError> {
    Ok(ContractItemEntity::find()
        .filter(contract_item::Column::ContractId.eq(contract_id))
        .order_by_asc(contract_item::Column::CreatedAt)
        .order_by_asc(contract_item::Column::Id)
        .all(conn)
        .await?)
}

fn ensure_editable(contract: &contract::Model) -> Result<(), ServiceError> {
    if contract.status.is_editable() {
        Ok(())
    } else {
        Err(ServiceError::ContractNotEditable {
            code: contract.code.clone(),
            status: contract.status,
        })
    }
}

#[derive(Clone)]
pub struct ContractService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ContractService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_contract(
        &self,
        input: CreateContractInput,
    ) -> Result<contract::Model, ServiceError> {
        input.validate()?;
        if input.end_date <= input.start_date {
            return Err(ServiceError::ValidationError(format!(
                "Contract end date {} must be after start date {}",
                input.end_date, input.start_date
            )));
        }

        let now = Utc::now();
        let model = contract::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(input.tenant_id),
            code: Set(input.code),
            status: Set(ContractStatus::Draft),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            items_total: Set(Decimal::ZERO),
            adjustment_total: Set(Decimal::ZERO),
            total_value: Set(Decimal::ZERO),
            requires_upfront_payment: Set(false),
            activated_at: Set(None),
            closed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(contract_id = %model.id, "Contract drafted");
        Ok(model)
    }

    pub async fn get_contract(&self, contract_id: Uuid) -> Result<contract::Model, ServiceError> {
        ContractEntity::find_by_id(contract_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Contract {}", contract_id)))
    }

    pub async fn items(&self, contract_id: Uuid) -> Result<Vec<contract_item::Model>, ServiceError> {
        contract_items(&*self.db, contract_id).await
    }

    /// Adds a line to a draft contract. A contract holds at most one line per
    /// asset type.
    #[instrument(skip(self, input), fields(asset_type_id = %input.asset_type_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        contract_id: Uuid,
        input: AddItemInput,
    ) -> Result<contract_item::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;
        let contract = lock_contract(&txn, contract_id).await?;
        ensure_editable(&contract)?;

        AssetTypeEntity::find_by_id(input.asset_type_id)
            .one(&txn)
            .await?
            .filter(|a| a.tenant_id == contract.tenant_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Asset type {}", input.asset_type_id)))?;

        let existing = ContractItemEntity::find()
            .filter(contract_item::Column::ContractId.eq(contract_id))
            .filter(contract_item::Column::AssetTypeId.eq(input.asset_type_id))
            .count(&txn)
            .await?;
        if existing > 0 {
            return Err(ServiceError::Conflict(format!(
                "Contract {} already has a line for asset type {}",
                contract.code, input.asset_type_id
            )));
        }

        let now = Utc::now();
        let days = pricing::rental_days(contract.start_date, contract.end_date);
        let item = contract_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            contract_id: Set(contract_id),
            asset_type_id: Set(input.asset_type_id),
            quantity: Set(input.quantity),
            unit_price: Set(input.unit_price),
            line_total: Set(pricing::line_total(input.unit_price, input.quantity, days)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        pricing::recalculate_totals(&txn, contract).await?;
        txn.commit().await?;

        info!(contract_item_id = %item.id, "Contract item added");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        contract_item_id: Uuid,
        quantity: i32,
    ) -> Result<contract_item::Model, ServiceError> {
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "Item quantity must be between 1 and {}, got {}",
                MAX_QUANTITY, quantity
            )));
        }

        let txn = self.db.begin().await?;
        let item = find_item(&txn, contract_item_id).await?;
        let contract = lock_contract(&txn, item.contract_id).await?;
        ensure_editable(&contract)?;

        let mut active: contract_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        pricing::recalculate_totals(&txn, contract).await?;
        let item = find_item(&txn, contract_item_id).await?;
        txn.commit().await?;

        info!(quantity, "Contract item quantity changed");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, contract_item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let item = find_item(&txn, contract_item_id).await?;
        let contract = lock_contract(&txn, item.contract_id).await?;
        ensure_editable(&contract)?;

        item.delete(&txn).await?;
        pricing::recalculate_totals(&txn, contract).await?;
        txn.commit().await?;

        info!("Contract item removed");
        Ok(())
    }

    /// Allocates every line of a draft contract and moves it to Active, or to
    /// AwaitingPayment when upfront billing is required. Any allocation
    /// failure leaves the contract in Draft with no allocation written.
    #[instrument(skip(self))]
    pub async fn activate(
        &self,
        contract_id: Uuid,
        requires_upfront_payment: bool,
    ) -> Result<contract::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let contract = lock_contract(&txn, contract_id).await?;

        let target = if requires_upfront_payment {
            ContractStatus::AwaitingPayment
        } else {
            ContractStatus::Active
        };
        if contract.status != ContractStatus::Draft
            || !ContractStatus::can_transition(contract.status, target)
        {
            warn!(code = %contract.code, status = %contract.status, "Contract not activatable");
            return Err(ServiceError::ContractNotActivatable {
                code: contract.code,
                status: contract.status,
            });
        }

        let items = contract_items(&txn, contract_id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Contract {} has no items to activate",
                contract.code
            )));
        }

        let mut units: u64 = 0;
        for item in &items {
            allocation::allocate(&txn, contract.tenant_id, item, item.quantity).await?;
            units += u64::try_from(item.quantity).unwrap_or(0);
        }

        let now = Utc::now();
        let mut active: contract::ActiveModel = contract.into();
        active.status = Set(target);
        active.requires_upfront_payment = Set(requires_upfront_payment);
        active.activated_at = Set(Some(now));
        active.updated_at = Set(now);
        let contract = active.update(&txn).await?;
        txn.commit().await?;

        ALLOCATIONS.inc_by(items.len() as u64);
        ALLOCATED_UNITS.inc_by(units);
        info!(
            code = %contract.code,
            status = %contract.status,
            items = items.len(),
            units,
            "Contract activated"
        );
        self.event_sender
            .send_or_log(Event::ContractActivated {
                contract_id,
                status: contract.status,
            })
            .await;

        Ok(contract)
    }

    /// Moves a contract awaiting its upfront payment to Active. Inventory is
    /// already allocated at this point.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, contract_id: Uuid) -> Result<contract::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let contract = lock_contract(&txn, contract_id).await?;
        if contract.status != ContractStatus::AwaitingPayment {
            return Err(ServiceError::ContractNotActivatable {
                code: contract.code,
                status: contract.status,
            });
        }

        let mut active: contract::ActiveModel = contract.into();
        active.status = Set(ContractStatus::Active);
        active.updated_at = Set(Utc::now());
        let contract = active.update(&txn).await?;
        txn.commit().await?;

        info!(code = %contract.code, "Contract payment confirmed");
        self.event_sender
            .send_or_log(Event::ContractPaymentConfirmed(contract_id))
            .await;
        Ok(contract)
    }

    /// Cancels a contract, releasing its inventory when it holds any.
    #[instrument(skip(self))]
    pub async fn cancel(&self, contract_id: Uuid) -> Result<contract::Model, ServiceError> {
        self.close(contract_id, ContractStatus::Canceled).await
    }

    /// Finalizes an active contract and returns its inventory to the lots.
    #[instrument(skip(self))]
    pub async fn finalize(&self, contract_id: Uuid) -> Result<contract::Model, ServiceError> {
        self.close(contract_id, ContractStatus::Finalized).await
    }

    async fn close(
        &self,
        contract_id: Uuid,
        target: ContractStatus,
    ) -> Result<contract::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let contract = lock_contract(&txn, contract_id).await?;
        if !ContractStatus::can_transition(contract.status, target) {
            warn!(code = %contract.code, status = %contract.status, target = %target, "Contract not closable");
            return Err(ServiceError::ContractNotClosable {
                code: contract.code,
                status: contract.status,
            });
        }

        let mut released: i64 = 0;
        if contract.status.holds_inventory() {
            for item in contract_items(&txn, contract_id).await? {
                released += i64::from(release::release_all(&txn, item.id).await?);
            }
        }

        let now = Utc::now();
        let mut active: contract::ActiveModel = contract.into();
        active.status = Set(target);
        active.closed_at = Set(Some(now));
        active.updated_at = Set(now);
        let contract = active.update(&txn).await?;
        txn.commit().await?;

        info!(code = %contract.code, status = %target, released, "Contract closed");
        self.event_sender
            .send_or_log(Event::ContractClosed {
                contract_id,
                status: target,
            })
            .await;
        Ok(contract)
    }
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
) -> Result<contract_item::Model, ServiceError> {
    ContractItemEntity::find_by_id(contract_item_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Contract item {}", contract_item_id)))
}
