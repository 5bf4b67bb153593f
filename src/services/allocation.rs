//! FIFO allocation of lot units to contract line items.
//!
//! The free functions in this module run against any connection, so the
//! contract and amendment flows compose them inside their own transaction.
//! [`AllocationService`] wraps them for callers that allocate or release a
//! single line item on its own.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{
    allocation::{self, Entity as AllocationEntity},
    contract::{self, Entity as ContractEntity},
    contract_item::{self, Entity as ContractItemEntity},
    lot::{self, Entity as LotEntity, LotStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{ALLOCATED_UNITS, ALLOCATIONS, ALLOCATION_FAILURES};
use crate::services::release;

/// Locks every lot eligible for `(tenant, asset type)` in FIFO order: oldest
/// acquisition first, then oldest creation, then lowest id.
///
/// Taking the row locks in this fixed order keeps concurrent allocations over
/// overlapping lot sets from deadlocking.
pub(crate) async fn lock_eligible_lots<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    asset_type_id: Uuid,
) -> Result<Vec<lot::Model>, ServiceError> {
    Ok(LotEntity::find()
        .filter(lot::Column::TenantId.eq(tenant_id))
        .filter(lot::Column::AssetTypeId.eq(asset_type_id))
        .filter(lot::Column::Unavailable.eq(false))
        .filter(lot::Column::AvailableQuantity.gt(0))
        .order_by_asc(lot::Column::AcquiredOn)
        .order_by_asc(lot::Column::CreatedAt)
        .order_by_asc(lot::Column::Id)
        .lock_exclusive()
        .all(conn)
        .await?)
}

/// Sum of allocation record quantities for a line item.
pub async fn allocated_quantity<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let records = AllocationEntity::find()
        .filter(allocation::Column::ContractItemId.eq(contract_item_id))
        .all(conn)
        .await?;
    let total: i64 = records.iter().map(|r| i64::from(r.quantity)).sum();
    i32::try_from(total).map_err(|_| {
        error!(contract_item_id = %contract_item_id, total, "Allocated quantity out of range");
        ServiceError::ConsistencyViolation(format!(
            "line item {} holds {} allocated units",
            contract_item_id, total
        ))
    })
}

/// Commits `quantity` units to `item` from the tenant's lots in FIFO order.
///
/// Each lot touched yields exactly one new allocation record, even when the
/// item already holds a record on that lot. Records are never merged: the
/// record id is the allocation-recency order that LIFO release walks, so
/// folding new units into an older record would release them out of order.
///
/// When the eligible lots cannot cover the request nothing is written and
/// [`ServiceError::QuantityUnavailable`] reports the requested and available
/// quantities; callers run this inside a transaction so any earlier writes of
/// theirs roll back with it.
pub async fn allocate<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    item: &contract_item::Model,
    quantity: i32,
) -> Result<Vec<allocation::Model>, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Allocation quantity must be positive, got {}",
            quantity
        )));
    }

    let already_allocated = allocated_quantity(conn, item.id).await?;
    if i64::from(already_allocated) + i64::from(quantity) > i64::from(item.quantity) {
        return Err(ServiceError::InvalidOperation(format!(
            "Allocating {} more units to line item {} would exceed its quantity {} ({} already allocated)",
            quantity, item.id, item.quantity, already_allocated
        )));
    }

    let lots = lock_eligible_lots(conn, tenant_id, item.asset_type_id).await?;
    let available: i64 = lots.iter().map(|l| i64::from(l.available_quantity)).sum();
    if available < i64::from(quantity) {
        // Below `quantity`, so within i32.
        let available = i32::try_from(available).unwrap_or(i32::MAX);
        ALLOCATION_FAILURES
            .with_label_values(&["quantity_unavailable"])
            .inc();
        warn!(
            contract_item_id = %item.id,
            asset_type_id = %item.asset_type_id,
            requested = quantity,
            available,
            "Insufficient lot availability"
        );
        return Err(ServiceError::QuantityUnavailable {
            requested: quantity,
            available,
        });
    }

    let now = Utc::now();
    let mut remaining = quantity;
    let mut records = Vec::new();

    for lot in lots {
        if remaining == 0 {
            break;
        }

        let take = remaining.min(lot.available_quantity);
        let new_available = lot.available_quantity - take;
        let lot_id = lot.id;
        let unavailable = lot.unavailable;

        let mut active: lot::ActiveModel = lot.into();
        active.available_quantity = Set(new_available);
        active.status = Set(LotStatus::derive(unavailable, new_available));
        active.updated_at = Set(now);
        active.update(conn).await?;

        let record = allocation::ActiveModel {
            contract_item_id: Set(item.id),
            lot_id: Set(lot_id),
            quantity: Set(take),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        records.push(record);
        remaining -= take;
    }

    if remaining != 0 {
        // The availability sum above was taken under the same locks.
        error!(
            contract_item_id = %item.id,
            remaining,
            "Locked lots did not cover a request they were summed to cover"
        );
        return Err(ServiceError::ConsistencyViolation(format!(
            "allocation for line item {} left {} units unplaced",
            item.id, remaining
        )));
    }

    Ok(records)
}

/// Line-item level allocation API with its own transaction per call.
#[derive(Clone)]
pub struct AllocationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl AllocationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Allocates `quantity` units to a line item of a committed contract.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        contract_item_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<allocation::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let item = find_item(&txn, contract_item_id).await?;
        let contract = ContractEntity::find_by_id(item.contract_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Contract {}", item.contract_id)))?;
        ensure_holds_inventory(&contract)?;

        let records = allocate(&txn, contract.tenant_id, &item, quantity).await?;
        txn.commit().await?;

        ALLOCATIONS.inc();
        ALLOCATED_UNITS.inc_by(quantity as u64);
        info!(
            contract_item_id = %contract_item_id,
            quantity,
            lots = records.len(),
            "Line item allocated"
        );
        self.event_sender
            .send_or_log(Event::LotsAllocated {
                contract_item_id,
                quantity,
                lots: records.iter().map(|r| r.lot_id).collect(),
            })
            .await;

        Ok(records)
    }

    /// Returns every unit allocated to the line item to its lot.
    #[instrument(skip(self))]
    pub async fn release_all(&self, contract_item_id: Uuid) -> Result<i32, ServiceError> {
        let txn = self.db.begin().await?;
        find_item(&txn, contract_item_id).await?;
        let released = release::release_all(&txn, contract_item_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::AllocationReleased {
                contract_item_id,
                quantity: released,
            })
            .await;
        Ok(released)
    }

    /// Releases `quantity` units, most recent allocation first. Returns the
    /// quantity actually released, which is lower than requested only when
    /// less was allocated.
    #[instrument(skip(self))]
    pub async fn release_partial(
        &self,
        contract_item_id: Uuid,
        quantity: i32,
    ) -> Result<i32, ServiceError> {
        let txn = self.db.begin().await?;
        find_item(&txn, contract_item_id).await?;
        let released = release::release_partial(&txn, contract_item_id, quantity).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::AllocationReleased {
                contract_item_id,
                quantity: released,
            })
            .await;
        Ok(released)
    }

    /// Allocation records of a line item in allocation order.
    pub async fn allocations_for(
        &self,
        contract_item_id: Uuid,
    ) -> Result<Vec<allocation::Model>, ServiceError> {
        Ok(AllocationEntity::find()
            .filter(allocation::Column::ContractItemId.eq(contract_item_id))
            .order_by_asc(allocation::Column::Id)
            .all(&*self.db)
            .await?)
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

fn ensure_holds_inventory(contract: &contract::Model) -> Result<(), ServiceError> {
    if contract.status.holds_inventory() {
        Ok(())
    } else {
        Err(ServiceError::ContractNotActive {
            code: contract.code.clone(),
            status: contract.status,
        })
    }
}
