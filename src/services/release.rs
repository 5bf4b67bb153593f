//! Returns allocated units to their lots.
//!
//! Partial releases walk a line item's allocation records most recent first
//! (highest id), so the units allocated last are the first to go back.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

use crate::entities::{
    allocation::{self, Entity as AllocationEntity},
    lot::{self, Entity as LotEntity, LotStatus},
};
use crate::errors::ServiceError;
use crate::metrics::{RELEASED_UNITS, RELEASES};

/// Releases every unit allocated to the line item and deletes its records.
/// Returns the quantity released.
pub async fn release_all<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
) -> Result<i32, ServiceError> {
    let records = records_newest_first(conn, contract_item_id).await?;
    let total: i64 = records.iter().map(|r| i64::from(r.quantity)).sum();
    let total = i32::try_from(total).map_err(|_| {
        error!(contract_item_id = %contract_item_id, total, "Allocated quantity out of range");
        ServiceError::ConsistencyViolation(format!(
            "line item {} holds {} allocated units",
            contract_item_id, total
        ))
    })?;
    let released = release_records(conn, contract_item_id, records, total).await?;
    RELEASES.with_label_values(&["all"]).inc();
    Ok(released)
}

/// Releases up to `quantity` units, most recent allocation first.
///
/// Records fully consumed are deleted; the last one touched is reduced in
/// place. Returns the quantity actually released, which falls short of
/// `quantity` only when less than that is allocated. Callers that require an
/// exact release compare the two.
pub async fn release_partial<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
    quantity: i32,
) -> Result<i32, ServiceError> {
    if quantity < 0 {
        return Err(ServiceError::ValidationError(format!(
            "Release quantity cannot be negative, got {}",
            quantity
        )));
    }
    if quantity == 0 {
        return Ok(0);
    }

    let records = records_newest_first(conn, contract_item_id).await?;
    let released = release_records(conn, contract_item_id, records, quantity).await?;
    RELEASES.with_label_values(&["partial"]).inc();
    Ok(released)
}

async fn records_newest_first<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
) -> Result<Vec<allocation::Model>, ServiceError> {
    Ok(AllocationEntity::find()
        .filter(allocation::Column::ContractItemId.eq(contract_item_id))
        .order_by_desc(allocation::Column::Id)
        .all(conn)
        .await?)
}

/// Locks the given lots in FIFO order, the same order the allocator uses.
async fn lock_lots<C: ConnectionTrait>(
    conn: &C,
    lot_ids: Vec<i64>,
) -> Result<BTreeMap<i64, lot::Model>, ServiceError> {
    let lots = LotEntity::find()
        .filter(lot::Column::Id.is_in(lot_ids))
        .order_by_asc(lot::Column::AcquiredOn)
        .order_by_asc(lot::Column::CreatedAt)
        .order_by_asc(lot::Column::Id)
        .lock_exclusive()
        .all(conn)
        .await?;
    Ok(lots.into_iter().map(|l| (l.id, l)).collect())
}

async fn release_records<C: ConnectionTrait>(
    conn: &C,
    contract_item_id: Uuid,
    records: Vec<allocation::Model>,
    quantity: i32,
) -> Result<i32, ServiceError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut lot_ids: Vec<i64> = records.iter().map(|r| r.lot_id).collect();
    lot_ids.sort_unstable();
    lot_ids.dedup();
    let mut lots = lock_lots(conn, lot_ids.clone()).await?;

    if let Some(missing) = lot_ids.iter().find(|id| !lots.contains_key(id)) {
        error!(
            contract_item_id = %contract_item_id,
            lot_id = missing,
            "Allocation references a lot that no longer exists"
        );
        return Err(ServiceError::ConsistencyViolation(format!(
            "allocation for line item {} references missing lot {}",
            contract_item_id, missing
        )));
    }

    let now = Utc::now();
    let mut remaining = quantity;
    let mut returned: BTreeMap<i64, i64> = BTreeMap::new();

    for record in records {
        if remaining == 0 {
            break;
        }

        let take = remaining.min(record.quantity);
        *returned.entry(record.lot_id).or_insert(0) += i64::from(take);

        if take == record.quantity {
            record.delete(conn).await?;
        } else {
            let left = record.quantity - take;
            let mut active: allocation::ActiveModel = record.into();
            active.quantity = Set(left);
            active.updated_at = Set(now);
            active.update(conn).await?;
        }

        remaining -= take;
    }

    for (lot_id, units) in returned {
        let Some(lot) = lots.remove(&lot_id) else {
            continue;
        };
        let new_available = i64::from(lot.available_quantity) + units;
        if new_available > i64::from(lot.total_quantity) {
            error!(
                lot_id,
                lot_code = %lot.code,
                available = new_available,
                total = lot.total_quantity,
                "Release would push lot availability past its total"
            );
            return Err(ServiceError::ConsistencyViolation(format!(
                "lot {} would hold {} available units of {} total",
                lot.code, new_available, lot.total_quantity
            )));
        }
        // Bounded by the lot total above.
        let new_available = i32::try_from(new_available).unwrap_or(lot.total_quantity);

        let unavailable = lot.unavailable;
        let mut active: lot::ActiveModel = lot.into();
        active.available_quantity = Set(new_available);
        active.status = Set(LotStatus::derive(unavailable, new_available));
        active.updated_at = Set(now);
        active.update(conn).await?;
    }

    let released = quantity - remaining;
    RELEASED_UNITS.inc_by(released as u64);
    debug!(
        contract_item_id = %contract_item_id,
        requested = quantity,
        released,
        "Released allocations"
    );
    Ok(released)
}
