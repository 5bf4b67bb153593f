//! Lot Service
//!
//! Registers asset types and lots and maintains the lot fields that are not
//! owned by the allocator: the unavailable flag and the total quantity.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    allocation::{self, Entity as AllocationEntity},
    asset_type::{self, Entity as AssetTypeEntity},
    lot::{self, Entity as LotEntity, LotStatus},
};
use crate::errors::ServiceError;
use crate::services::MAX_QUANTITY;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterLotInput {
    pub tenant_id: Uuid,
    pub asset_type_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(range(min = 0, max = 1_000_000_000))]
    pub quantity: i32,
    pub acquired_on: NaiveDate,
}

/// Quantity summary of one asset type across a tenant's lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub asset_type_id: Uuid,
    pub lots: usize,
    pub total: i64,
    pub available: i64,
    pub allocated: i64,
    /// Units that the allocator may hand out right now.
    pub eligible: i64,
}

#[derive(Clone)]
pub struct LotService {
    db: Arc<DatabaseConnection>,
}

impl LotService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn register_asset_type(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<asset_type::Model, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::ValidationError(
                "Asset type name cannot be empty".to_string(),
            ));
        }

        let model = asset_type::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(asset_type_id = %model.id, name = %model.name, "Asset type registered");
        Ok(model)
    }

    /// Registers a lot with every unit available.
    #[instrument(skip(self, input), fields(code = %input.code, quantity = input.quantity))]
    pub async fn register_lot(&self, input: RegisterLotInput) -> Result<lot::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let asset_type = AssetTypeEntity::find_by_id(input.asset_type_id)
            .one(db)
            .await?
            .filter(|a| a.tenant_id == input.tenant_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Asset type {}", input.asset_type_id)))?;

        let duplicate = LotEntity::find()
            .filter(lot::Column::TenantId.eq(input.tenant_id))
            .filter(lot::Column::Code.eq(input.code.as_str()))
            .count(db)
            .await?;
        if duplicate > 0 {
            warn!(code = %input.code, "Lot code already in use");
            return Err(ServiceError::Conflict(format!(
                "Lot code {} already exists",
                input.code
            )));
        }

        let now = Utc::now();
        let model = lot::ActiveModel {
            tenant_id: Set(input.tenant_id),
            asset_type_id: Set(asset_type.id),
            code: Set(input.code),
            total_quantity: Set(input.quantity),
            available_quantity: Set(input.quantity),
            acquired_on: Set(input.acquired_on),
            unavailable: Set(false),
            status: Set(LotStatus::derive(false, input.quantity)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(
            lot_id = model.id,
            asset_type = %asset_type.name,
            acquired_on = %model.acquired_on,
            "Lot registered"
        );
        Ok(model)
    }

    pub async fn get_lot(&self, lot_id: i64) -> Result<lot::Model, ServiceError> {
        LotEntity::find_by_id(lot_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Lot {}", lot_id)))
    }

    /// Flags a lot as unavailable (or clears the flag). Flagged lots keep
    /// their existing allocations but are skipped by new allocations.
    #[instrument(skip(self))]
    pub async fn set_unavailable(
        &self,
        lot_id: i64,
        unavailable: bool,
    ) -> Result<lot::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let lot = lock_lot(&txn, lot_id).await?;
        let available = lot.available_quantity;

        let mut active: lot::ActiveModel = lot.into();
        active.unavailable = Set(unavailable);
        active.status = Set(LotStatus::derive(unavailable, available));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(lot_id, unavailable, "Lot availability flag changed");
        Ok(updated)
    }

    /// Changes a lot's total quantity (restock or write-off). The allocated
    /// share is kept, so availability moves by the same amount as the total.
    #[instrument(skip(self))]
    pub async fn update_total_quantity(
        &self,
        lot_id: i64,
        new_total: i32,
    ) -> Result<lot::Model, ServiceError> {
        if !(0..=MAX_QUANTITY).contains(&new_total) {
            return Err(ServiceError::ValidationError(format!(
                "Lot total must be between 0 and {}, got {}",
                MAX_QUANTITY, new_total
            )));
        }

        let txn = self.db.begin().await?;
        let lot = lock_lot(&txn, lot_id).await?;
        let allocated = lot.allocated_quantity();
        if new_total < allocated {
            warn!(lot_id, new_total, allocated, "Lot total below allocated quantity");
            return Err(ServiceError::LotQuantityBelowAllocated {
                lot_code: lot.code,
                requested_total: new_total,
                allocated,
            });
        }

        let new_available = new_total - allocated;
        let unavailable = lot.unavailable;
        let mut active: lot::ActiveModel = lot.into();
        active.total_quantity = Set(new_total);
        active.available_quantity = Set(new_available);
        active.status = Set(LotStatus::derive(unavailable, new_available));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(lot_id, new_total, available = new_available, "Lot total updated");
        Ok(updated)
    }

    /// Deletes a lot that no allocation references.
    #[instrument(skip(self))]
    pub async fn delete_lot(&self, lot_id: i64) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let lot = lock_lot(&txn, lot_id).await?;

        let references = AllocationEntity::find()
            .filter(allocation::Column::LotId.eq(lot_id))
            .count(&txn)
            .await?;
        if references > 0 {
            warn!(lot_id, references, "Refusing to delete lot with allocations");
            return Err(ServiceError::LotHasActiveAllocations { lot_code: lot.code });
        }

        LotEntity::delete_by_id(lot_id).exec(&txn).await?;
        txn.commit().await?;

        info!(lot_id, code = %lot.code, "Lot deleted");
        Ok(())
    }

    /// Lots of one asset type in the order the allocator consumes them.
    pub async fn list_lots(
        &self,
        tenant_id: Uuid,
        asset_type_id: Uuid,
    ) -> Result<Vec<lot::Model>, ServiceError> {
        Ok(LotEntity::find()
            .filter(lot::Column::TenantId.eq(tenant_id))
            .filter(lot::Column::AssetTypeId.eq(asset_type_id))
            .order_by_asc(lot::Column::AcquiredOn)
            .order_by_asc(lot::Column::CreatedAt)
            .order_by_asc(lot::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn availability(
        &self,
        tenant_id: Uuid,
        asset_type_id: Uuid,
    ) -> Result<Availability, ServiceError> {
        let lots = self.list_lots(tenant_id, asset_type_id).await?;
        Ok(summarize(asset_type_id, &lots))
    }
}

async fn lock_lot<C: sea_orm::ConnectionTrait>(
    conn: &C,
    lot_id: i64,
) -> Result<lot::Model, ServiceError> {
    LotEntity::find_by_id(lot_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Lot {}", lot_id)))
}

fn summarize(asset_type_id: Uuid, lots: &[lot::Model]) -> Availability {
    Availability {
        asset_type_id,
        lots: lots.len(),
        total: lots.iter().map(|l| i64::from(l.total_quantity)).sum(),
        available: lots.iter().map(|l| i64::from(l.available_quantity)).sum(),
        allocated: lots.iter().map(|l| i64::from(l.allocated_quantity())).sum(),
        eligible: lots
            .iter()
            .filter(|l| l.is_eligible())
            .map(|l| i64::from(l.available_quantity))
            .sum(),
    }
}
