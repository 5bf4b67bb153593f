//! Amendment Service
//!
//! Drafts amendments against active contracts, applies them and reverts
//! applied ones on cancellation. Each apply or revert runs in one transaction
//! with the amendment's own status change, and records what it needs to undo
//! itself exactly: the previous end date for extensions, the contract line
//! and rate for item amendments, the adjustment for value changes.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    amendment::{self, AmendmentKind, AmendmentStatus, Entity as AmendmentEntity},
    amendment_item::{self, Entity as AmendmentItemEntity},
    asset_type::Entity as AssetTypeEntity,
    contract::{self, ContractStatus},
    contract_item::{self, Entity as ContractItemEntity},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::AMENDMENT_OPERATIONS;
use crate::services::contracts::{lock_contract, validate_price};
use crate::services::{allocation, grow_quantity, pricing, release};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAmendmentInput {
    pub kind: AmendmentKind,
    /// Required for extensions.
    pub new_end_date: Option<NaiveDate>,
    /// Required for value changes. May be negative.
    pub adjustment_amount: Option<Decimal>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AmendmentItemInput {
    pub asset_type_id: Uuid,
    /// Units added or removed; always positive, the kind gives the sign.
    #[validate(range(min = 1, max = 1_000_000_000))]
    pub quantity: i32,
    /// Daily rate for added units. Reductions take the rate of the contract
    /// line they reduce.
    #[validate(custom = "validate_price")]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTermsInput {
    pub new_end_date: Option<NaiveDate>,
    pub adjustment_amount: Option<Decimal>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

async fn lock_amendment<C: ConnectionTrait>(
    conn: &C,
    amendment_id: Uuid,
) -> Result<amendment::Model, ServiceError> {
    AmendmentEntity::find_by_id(amendment_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Amendment {}", amendment_id)))
}

async fn amendment_items<C: ConnectionTrait>(
    conn: &C,
    amendment_id: Uuid,
) -> Result<Vec<amendment_item::Model>, ServiceError> {
    Ok(AmendmentItemEntity::find()
        .filter(amendment_item::Column::AmendmentId.eq(amendment_id))
        .order_by_asc(amendment_item::Column::CreatedAt)
        .order_by_asc(amendment_item::Column::Id)
        .all(conn)
        .await?)
}

/// The contract's line for an asset type, if it has one.
async fn line_for_asset<C: ConnectionTrait>(
    conn: &C,
    contract_id: Uuid,
    asset_type_id: Uuid,
) -> Result<Option<contract_item::Model>, ServiceError> {
    Ok(ContractItemEntity::find()
        .filter(contract_item::Column::ContractId.eq(contract_id))
        .filter(contract_item::Column::AssetTypeId.eq(asset_type_id))
        .one(conn)
        .await?)
}

async fn asset_type_name<C: ConnectionTrait>(conn: &C, asset_type_id: Uuid) -> Result<String, ServiceError> {
    Ok(AssetTypeEntity::find_by_id(asset_type_id)
        .one(conn)
        .await?
        .map(|a| a.name)
        .unwrap_or_else(|| asset_type_id.to_string()))
}

fn ensure_draft(amendment: &amendment::Model) -> Result<(), ServiceError> {
    if amendment.status.is_editable() {
        Ok(())
    } else {
        Err(ServiceError::AmendmentImmutable {
            id: amendment.id,
            status: amendment.status,
        })
    }
}

fn ensure_contract_active(contract: &contract::Model) -> Result<(), ServiceError> {
    if contract.status == ContractStatus::Active {
        Ok(())
    } else {
        Err(ServiceError::ContractNotActive {
            code: contract.code.clone(),
            status: contract.status,
        })
    }
}

/// Sets a line's quantity, deleting the line when it drops to zero.
async fn resize_line<C: ConnectionTrait>(
    conn: &C,
    line: contract_item::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity > 0 {
        let mut active: contract_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        return Ok(());
    }

    let still_allocated = allocation::allocated_quantity(conn, line.id).await?;
    if still_allocated != 0 {
        error!(
            contract_item_id = %line.id,
            still_allocated,
            "Line emptied by amendment still holds allocations"
        );
        return Err(ServiceError::ConsistencyViolation(format!(
            "line item {} reached zero quantity with {} units allocated",
            line.id, still_allocated
        )));
    }
    line.delete(conn).await?;
    Ok(())
}

/// Releases exactly `quantity` units from a line, treating any shortfall as
/// ledger corruption. Callers check the allocated quantity beforehand.
async fn release_exact<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let released = release::release_partial(conn, contract_item_id, quantity).await?;
    if released != quantity {
        error!(
            contract_item_id = %contract_item_id,
            requested = quantity,
            released,
            "Release fell short of a checked allocation"
        );
        return Err(ServiceError::ReleaseShortfall {
            item_id: contract_item_id,
            requested: quantity,
            released,
        });
    }
    Ok(())
}

async fn link_item<C: ConnectionTrait>(
    conn: &C,
    item: amendment_item::Model,
    contract_item_id: Uuid,
    unit_price: Decimal,
) -> Result<(), ServiceError> {
    let mut active: amendment_item::ActiveModel = item.into();
    active.contract_item_id = Set(Some(contract_item_id));
    active.unit_price = Set(unit_price);
    active.update(conn).await?;
    Ok(())
}

#[derive(Clone)]
pub struct AmendmentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    billing_days_per_month: u32,
}

impl AmendmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        billing_days_per_month: u32,
    ) -> Self {
        Self {
            db,
            event_sender,
            billing_days_per_month,
        }
    }

    /// Drafts an amendment against an active contract.
    #[instrument(skip(self, input), fields(kind = %input.kind))]
    pub async fn create_amendment(
        &self,
        contract_id: Uuid,
        input: CreateAmendmentInput,
    ) -> Result<amendment::Model, ServiceError> {
        input.validate()?;
        match input.kind {
            AmendmentKind::Extension if input.new_end_date.is_none() => {
                return Err(ServiceError::ValidationError(
                    "Extension amendments require a new end date".to_string(),
                ));
            }
            AmendmentKind::ValueChange if input.adjustment_amount.is_none() => {
                return Err(ServiceError::ValidationError(
                    "Value change amendments require an adjustment amount".to_string(),
                ));
            }
            _ => {}
        }

        let txn = self.db.begin().await?;
        let contract = lock_contract(&txn, contract_id).await?;
        ensure_contract_active(&contract)?;

        let now = Utc::now();
        let model = amendment::ActiveModel {
            id: Set(Uuid::new_v4()),
            contract_id: Set(contract_id),
            kind: Set(input.kind),
            status: Set(AmendmentStatus::Draft),
            new_end_date: Set(input.new_end_date),
            previous_end_date: Set(None),
            adjustment_amount: Set(input.adjustment_amount.map(|a| a.round_dp(2))),
            previous_total: Set(None),
            monthly_delta: Set(Decimal::ZERO),
            notes: Set(input.notes),
            applied_at: Set(None),
            canceled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(amendment_id = %model.id, contract_id = %contract_id, "Amendment drafted");
        Ok(model)
    }

    pub async fn get_amendment(&self, amendment_id: Uuid) -> Result<amendment::Model, ServiceError> {
        AmendmentEntity::find_by_id(amendment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Amendment {}", amendment_id)))
    }

    pub async fn items(&self, amendment_id: Uuid) -> Result<Vec<amendment_item::Model>, ServiceError> {
        amendment_items(&*self.db, amendment_id).await
    }

    /// Adds an item to a draft addition or reduction. One item per asset type.
    #[instrument(skip(self, input), fields(asset_type_id = %input.asset_type_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        amendment_id: Uuid,
        input: AmendmentItemInput,
    ) -> Result<amendment_item::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;
        let amendment = lock_amendment(&txn, amendment_id).await?;
        ensure_draft(&amendment)?;

        if !amendment.kind.has_items() {
            return Err(ServiceError::InvalidOperation(format!(
                "{} amendments do not carry items",
                amendment.kind
            )));
        }
        let unit_price = match (amendment.kind, input.unit_price) {
            (AmendmentKind::Addition, None) => {
                return Err(ServiceError::ValidationError(
                    "Addition items require a unit price".to_string(),
                ));
            }
            (AmendmentKind::Addition, Some(price)) => price,
            _ => Decimal::ZERO,
        };

        let duplicate = AmendmentItemEntity::find()
            .filter(amendment_item::Column::AmendmentId.eq(amendment_id))
            .filter(amendment_item::Column::AssetTypeId.eq(input.asset_type_id))
            .count(&txn)
            .await?;
        if duplicate > 0 {
            return Err(ServiceError::Conflict(format!(
                "Amendment {} already has an item for asset type {}",
                amendment_id, input.asset_type_id
            )));
        }

        let item = amendment_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            amendment_id: Set(amendment_id),
            asset_type_id: Set(input.asset_type_id),
            quantity: Set(input.quantity),
            unit_price: Set(unit_price),
            contract_item_id: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let mut active: amendment::ActiveModel = amendment.into();
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(amendment_item_id = %item.id, "Amendment item added");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, amendment_item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let item = AmendmentItemEntity::find_by_id(amendment_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Amendment item {}", amendment_item_id)))?;
        let amendment = lock_amendment(&txn, item.amendment_id).await?;
        ensure_draft(&amendment)?;

        item.delete(&txn).await?;
        txn.commit().await?;

        info!("Amendment item removed");
        Ok(())
    }

    /// Changes the end date, adjustment or notes of a draft amendment.
    #[instrument(skip(self, input))]
    pub async fn update_terms(
        &self,
        amendment_id: Uuid,
        input: UpdateTermsInput,
    ) -> Result<amendment::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;
        let amendment = lock_amendment(&txn, amendment_id).await?;
        ensure_draft(&amendment)?;

        let kind = amendment.kind;
        let mut active: amendment::ActiveModel = amendment.into();
        if let Some(date) = input.new_end_date {
            if kind != AmendmentKind::Extension {
                return Err(ServiceError::InvalidOperation(format!(
                    "{} amendments do not carry an end date",
                    kind
                )));
            }
            active.new_end_date = Set(Some(date));
        }
        if let Some(amount) = input.adjustment_amount {
            if kind != AmendmentKind::ValueChange {
                return Err(ServiceError::InvalidOperation(format!(
                    "{} amendments do not carry an adjustment",
                    kind
                )));
            }
            active.adjustment_amount = Set(Some(amount.round_dp(2)));
        }
        if input.notes.is_some() {
            active.notes = Set(input.notes);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Ok(updated)
    }

    /// Applies a draft amendment to its active contract.
    #[instrument(skip(self))]
    pub async fn apply(&self, amendment_id: Uuid) -> Result<amendment::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let amendment = lock_amendment(&txn, amendment_id).await?;
        if !AmendmentStatus::can_transition(amendment.status, AmendmentStatus::Active) {
            warn!(status = %amendment.status, "Amendment is not a draft");
            return Err(ServiceError::AmendmentImmutable {
                id: amendment.id,
                status: amendment.status,
            });
        }
        let contract = lock_contract(&txn, amendment.contract_id).await?;
        ensure_contract_active(&contract)?;

        let kind = amendment.kind;
        let now = Utc::now();
        let mut active: amendment::ActiveModel = amendment.clone().into();

        let monthly_delta = match kind {
            AmendmentKind::Extension => {
                let new_end_date = amendment.new_end_date.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Extension amendment has no new end date".to_string(),
                    )
                })?;
                if new_end_date <= contract.end_date {
                    warn!(
                        current_end_date = %contract.end_date,
                        new_end_date = %new_end_date,
                        "Extension does not move the end date forward"
                    );
                    return Err(ServiceError::InvalidExtension {
                        current_end_date: contract.end_date,
                        new_end_date,
                    });
                }
                active.previous_end_date = Set(Some(contract.end_date));
                self.set_end_date(&txn, contract, new_end_date).await?;
                Decimal::ZERO
            }
            AmendmentKind::Addition => self.apply_addition(&txn, &amendment, contract).await?,
            AmendmentKind::Reduction => self.apply_reduction(&txn, &amendment, contract).await?,
            AmendmentKind::ValueChange => {
                let adjustment = amendment.adjustment_amount.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Value change amendment has no adjustment amount".to_string(),
                    )
                })?;
                active.previous_total = Set(Some(contract.total_value));
                let adjustment_total = contract.adjustment_total + adjustment;
                let mut updated: contract::ActiveModel = contract.into();
                updated.adjustment_total = Set(adjustment_total);
                let contract = updated.update(&txn).await?;
                pricing::recalculate_totals(&txn, contract).await?;
                adjustment
            }
        };

        active.status = Set(AmendmentStatus::Active);
        active.monthly_delta = Set(monthly_delta);
        active.applied_at = Set(Some(now));
        active.updated_at = Set(now);
        let applied = active.update(&txn).await?;
        txn.commit().await?;

        AMENDMENT_OPERATIONS
            .with_label_values(&[kind.to_string().as_str(), "apply"])
            .inc();
        info!(
            amendment_id = %applied.id,
            kind = %kind,
            monthly_delta = %monthly_delta,
            "Amendment applied"
        );
        self.publish(
            Event::AmendmentApplied {
                amendment_id: applied.id,
                contract_id: applied.contract_id,
                kind,
            },
            &applied,
            monthly_delta,
        )
        .await;

        Ok(applied)
    }

    /// Cancels an amendment. A draft is simply marked canceled; an applied
    /// amendment has its effects reverted first.
    #[instrument(skip(self))]
    pub async fn cancel(&self, amendment_id: Uuid) -> Result<amendment::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let amendment = lock_amendment(&txn, amendment_id).await?;
        if !AmendmentStatus::can_transition(amendment.status, AmendmentStatus::Canceled) {
            warn!(status = %amendment.status, "Amendment is not cancelable");
            return Err(ServiceError::AmendmentNotCancelable {
                id: amendment.id,
                status: amendment.status,
            });
        }

        let kind = amendment.kind;
        let was_applied = amendment.status == AmendmentStatus::Active;
        let monthly_delta = if was_applied {
            let contract = lock_contract(&txn, amendment.contract_id).await?;
            ensure_contract_active(&contract)?;
            self.revert(&txn, &amendment, contract).await?;
            -amendment.monthly_delta
        } else {
            Decimal::ZERO
        };

        let now = Utc::now();
        let mut active: amendment::ActiveModel = amendment.into();
        active.status = Set(AmendmentStatus::Canceled);
        active.canceled_at = Set(Some(now));
        active.updated_at = Set(now);
        let canceled = active.update(&txn).await?;
        txn.commit().await?;

        info!(amendment_id = %canceled.id, kind = %kind, was_applied, "Amendment canceled");
        if was_applied {
            AMENDMENT_OPERATIONS
                .with_label_values(&[kind.to_string().as_str(), "revert"])
                .inc();
            self.publish(
                Event::AmendmentReverted {
                    amendment_id: canceled.id,
                    contract_id: canceled.contract_id,
                    kind,
                },
                &canceled,
                monthly_delta,
            )
            .await;
        }

        Ok(canceled)
    }

    async fn revert<C: ConnectionTrait>(
        &self,
        conn: &C,
        amendment: &amendment::Model,
        contract: contract::Model,
    ) -> Result<(), ServiceError> {
        match amendment.kind {
            AmendmentKind::Extension => {
                let previous = amendment.previous_end_date.ok_or_else(|| {
                    error!(amendment_id = %amendment.id, "Applied extension lost its previous end date");
                    ServiceError::ConsistencyViolation(format!(
                        "applied extension {} has no previous end date",
                        amendment.id
                    ))
                })?;
                self.set_end_date(conn, contract, previous).await?;
            }
            AmendmentKind::Addition => self.revert_addition(conn, amendment, contract).await?,
            AmendmentKind::Reduction => self.revert_reduction(conn, amendment, contract).await?,
            AmendmentKind::ValueChange => {
                let adjustment = amendment.adjustment_amount.unwrap_or_default();
                let adjustment_total = contract.adjustment_total - adjustment;
                let mut updated: contract::ActiveModel = contract.into();
                updated.adjustment_total = Set(adjustment_total);
                let contract = updated.update(conn).await?;
                let contract = pricing::recalculate_totals(conn, contract).await?;

                if let Some(previous) = amendment.previous_total {
                    if previous != contract.total_value {
                        warn!(
                            amendment_id = %amendment.id,
                            previous_total = %previous,
                            total_value = %contract.total_value,
                            "Contract changed since the value change was applied"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn set_end_date<C: ConnectionTrait>(
        &self,
        conn: &C,
        contract: contract::Model,
        end_date: NaiveDate,
    ) -> Result<(), ServiceError> {
        let mut active: contract::ActiveModel = contract.into();
        active.end_date = Set(end_date);
        let contract = active.update(conn).await?;
        pricing::recalculate_totals(conn, contract).await?;
        Ok(())
    }

    async fn apply_addition<C: ConnectionTrait>(
        &self,
        conn: &C,
        amendment: &amendment::Model,
        contract: contract::Model,
    ) -> Result<Decimal, ServiceError> {
        let items = amendment_items(conn, amendment.id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Amendment {} has no items",
                amendment.id
            )));
        }

        let days = pricing::rental_days(contract.start_date, contract.end_date);
        let mut delta = Decimal::ZERO;
        for item in items {
            let now = Utc::now();
            let line = match line_for_asset(conn, contract.id, item.asset_type_id).await? {
                Some(line) => {
                    let quantity = grow_quantity(line.quantity, item.quantity)?;
                    let mut active: contract_item::ActiveModel = line.into();
                    active.quantity = Set(quantity);
                    active.updated_at = Set(now);
                    active.update(conn).await?
                }
                None => {
                    contract_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        contract_id: Set(contract.id),
                        asset_type_id: Set(item.asset_type_id),
                        quantity: Set(item.quantity),
                        unit_price: Set(item.unit_price),
                        line_total: Set(pricing::line_total(item.unit_price, item.quantity, days)),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(conn)
                    .await?
                }
            };

            allocation::allocate(conn, contract.tenant_id, &line, item.quantity).await?;
            delta += pricing::monthly_amount(line.unit_price, item.quantity, self.billing_days_per_month);
            link_item(conn, item, line.id, line.unit_price).await?;
        }

        pricing::recalculate_totals(conn, contract).await?;
        Ok(delta)
    }

    async fn revert_addition<C: ConnectionTrait>(
        &self,
        conn: &C,
        amendment: &amendment::Model,
        contract: contract::Model,
    ) -> Result<(), ServiceError> {
        for item in amendment_items(conn, amendment.id).await? {
            let line = match item.contract_item_id {
                Some(id) => ContractItemEntity::find_by_id(id).one(conn).await?,
                None => line_for_asset(conn, contract.id, item.asset_type_id).await?,
            };
            let Some(line) = line else {
                return Err(ServiceError::ReversalUnavailable {
                    amendment_id: amendment.id,
                    requested: item.quantity,
                    available: 0,
                });
            };

            let allocated = allocation::allocated_quantity(conn, line.id).await?;
            if allocated < item.quantity {
                warn!(
                    amendment_id = %amendment.id,
                    contract_item_id = %line.id,
                    requested = item.quantity,
                    allocated,
                    "Added units are no longer allocated"
                );
                return Err(ServiceError::ReversalUnavailable {
                    amendment_id: amendment.id,
                    requested: item.quantity,
                    available: allocated,
                });
            }

            release_exact(conn, line.id, item.quantity).await?;
            let quantity = line.quantity - item.quantity;
            resize_line(conn, line, quantity).await?;
        }

        pricing::recalculate_totals(conn, contract).await?;
        Ok(())
    }

    async fn apply_reduction<C: ConnectionTrait>(
        &self,
        conn: &C,
        amendment: &amendment::Model,
        contract: contract::Model,
    ) -> Result<Decimal, ServiceError> {
        let items = amendment_items(conn, amendment.id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Amendment {} has no items",
                amendment.id
            )));
        }

        let mut delta = Decimal::ZERO;
        for item in items {
            let Some(line) = line_for_asset(conn, contract.id, item.asset_type_id).await? else {
                let asset_name = asset_type_name(conn, item.asset_type_id).await?;
                warn!(asset = %asset_name, requested = item.quantity, "No contract line to reduce");
                return Err(ServiceError::InvalidReduction {
                    asset_name,
                    requested: item.quantity,
                    allocated: 0,
                });
            };

            let allocated = allocation::allocated_quantity(conn, line.id).await?;
            if item.quantity > allocated {
                let asset_name = asset_type_name(conn, item.asset_type_id).await?;
                warn!(
                    asset = %asset_name,
                    requested = item.quantity,
                    allocated,
                    "Reduction exceeds allocated quantity"
                );
                return Err(ServiceError::ReductionExceedsQuantity {
                    asset_name,
                    requested: item.quantity,
                    allocated,
                });
            }

            release_exact(conn, line.id, item.quantity).await?;
            delta -= pricing::monthly_amount(line.unit_price, item.quantity, self.billing_days_per_month);

            let line_id = line.id;
            let unit_price = line.unit_price;
            let quantity = line.quantity - item.quantity;
            resize_line(conn, line, quantity).await?;
            link_item(conn, item, line_id, unit_price).await?;
        }

        pricing::recalculate_totals(conn, contract).await?;
        Ok(delta)
    }

    async fn revert_reduction<C: ConnectionTrait>(
        &self,
        conn: &C,
        amendment: &amendment::Model,
        contract: contract::Model,
    ) -> Result<(), ServiceError> {
        let days = pricing::rental_days(contract.start_date, contract.end_date);
        for item in amendment_items(conn, amendment.id).await? {
            let now = Utc::now();
            let line = match line_for_asset(conn, contract.id, item.asset_type_id).await? {
                Some(line) => {
                    let quantity = grow_quantity(line.quantity, item.quantity)?;
                    let mut active: contract_item::ActiveModel = line.into();
                    active.quantity = Set(quantity);
                    active.updated_at = Set(now);
                    active.update(conn).await?
                }
                None => {
                    // Recreated under the original id when the reduction emptied the line.
                    contract_item::ActiveModel {
                        id: Set(item.contract_item_id.unwrap_or_else(Uuid::new_v4)),
                        contract_id: Set(contract.id),
                        asset_type_id: Set(item.asset_type_id),
                        quantity: Set(item.quantity),
                        unit_price: Set(item.unit_price),
                        line_total: Set(pricing::line_total(item.unit_price, item.quantity, days)),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(conn)
                    .await?
                }
            };

            allocation::allocate(conn, contract.tenant_id, &line, item.quantity)
                .await
                .map_err(|e| match e {
                    ServiceError::QuantityUnavailable {
                        requested,
                        available,
                    } => {
                        warn!(
                            amendment_id = %amendment.id,
                            requested,
                            available,
                            "Released units were consumed elsewhere"
                        );
                        ServiceError::ReversalUnavailable {
                            amendment_id: amendment.id,
                            requested,
                            available,
                        }
                    }
                    other => other,
                })?;
        }

        pricing::recalculate_totals(conn, contract).await?;
        Ok(())
    }

    async fn publish(&self, event: Event, amendment: &amendment::Model, monthly_delta: Decimal) {
        self.event_sender.send_or_log(event).await;
        self.event_sender
            .send_or_log(Event::BillingDeltaComputed {
                contract_id: amendment.contract_id,
                amendment_id: amendment.id,
                monthly_delta,
                computed_at: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn item_input_requires_positive_quantity() {
        let input = AmendmentItemInput {
            asset_type_id: Uuid::nil(),
            quantity: 0,
            unit_price: Some(dec!(2.00)),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn item_input_rejects_negative_price() {
        let input = AmendmentItemInput {
            asset_type_id: Uuid::nil(),
            quantity: 3,
            unit_price: Some(dec!(-2.00)),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn only_applied_amendments_need_reverting() {
        assert!(AmendmentStatus::can_transition(
            AmendmentStatus::Draft,
            AmendmentStatus::Canceled
        ));
        assert!(AmendmentStatus::can_transition(
            AmendmentStatus::Active,
            AmendmentStatus::Canceled
        ));
        assert!(!AmendmentStatus::can_transition(
            AmendmentStatus::Canceled,
            AmendmentStatus::Canceled
        ));
    }
}
