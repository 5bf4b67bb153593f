//! Ledger audit: checks that every lot's committed units match its
//! allocation records and that no line item is over-allocated.

use sea_orm::{ConnectionTrait, EntityTrait, QueryOrder};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info};
use uuid::Uuid;

use crate::entities::{
    allocation::{self, Entity as AllocationEntity},
    contract_item::Entity as ContractItemEntity,
    lot::{self, Entity as LotEntity},
};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConservationViolation {
    /// `available` outside `0..=total`.
    LotBounds {
        lot_id: i64,
        code: String,
        total: i32,
        available: i32,
    },
    /// `total - available` differs from the allocation records.
    LotImbalance {
        lot_id: i64,
        code: String,
        committed: i64,
        recorded: i64,
    },
    /// More units allocated to a line than it requests.
    ItemOverAllocated {
        contract_item_id: Uuid,
        quantity: i32,
        allocated: i64,
    },
    NonPositiveAllocation { allocation_id: i64, quantity: i32 },
    /// Allocation pointing at a lot or line that does not exist.
    DanglingAllocation { allocation_id: i64 },
}

impl fmt::Display for ConservationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LotBounds {
                code,
                total,
                available,
                ..
            } => write!(f, "lot {} has {} available of {} total", code, available, total),
            Self::LotImbalance {
                code,
                committed,
                recorded,
                ..
            } => write!(
                f,
                "lot {} has {} units committed but {} recorded in allocations",
                code, committed, recorded
            ),
            Self::ItemOverAllocated {
                contract_item_id,
                quantity,
                allocated,
            } => write!(
                f,
                "line item {} has {} allocated for a quantity of {}",
                contract_item_id, allocated, quantity
            ),
            Self::NonPositiveAllocation {
                allocation_id,
                quantity,
            } => write!(f, "allocation {} has quantity {}", allocation_id, quantity),
            Self::DanglingAllocation { allocation_id } => {
                write!(f, "allocation {} references a missing lot or line", allocation_id)
            }
        }
    }
}

/// Scans every lot, line item and allocation record and reports each broken
/// invariant. An empty result means the ledger is consistent.
pub async fn verify_conservation<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<ConservationViolation>, ServiceError> {
    let lots = LotEntity::find()
        .order_by_asc(lot::Column::Id)
        .all(conn)
        .await?;
    let allocations = AllocationEntity::find()
        .order_by_asc(allocation::Column::Id)
        .all(conn)
        .await?;
    let items: HashMap<Uuid, i32> = ContractItemEntity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|i| (i.id, i.quantity))
        .collect();

    let violations = check(&lots, &allocations, &items);
    for violation in &violations {
        error!(violation = %violation, "Conservation violation");
    }
    info!(
        lots = lots.len(),
        allocations = allocations.len(),
        violations = violations.len(),
        "Conservation audit finished"
    );
    Ok(violations)
}

fn check(
    lots: &[lot::Model],
    allocations: &[allocation::Model],
    items: &HashMap<Uuid, i32>,
) -> Vec<ConservationViolation> {
    let mut violations = Vec::new();
    let mut per_lot: HashMap<i64, i64> = HashMap::new();
    let mut per_item: HashMap<Uuid, i64> = HashMap::new();

    for record in allocations {
        if record.quantity <= 0 {
            violations.push(ConservationViolation::NonPositiveAllocation {
                allocation_id: record.id,
                quantity: record.quantity,
            });
        }
        *per_lot.entry(record.lot_id).or_insert(0) += i64::from(record.quantity);
        *per_item.entry(record.contract_item_id).or_insert(0) += i64::from(record.quantity);

        let lot_known = lots.iter().any(|l| l.id == record.lot_id);
        if !lot_known || !items.contains_key(&record.contract_item_id) {
            violations.push(ConservationViolation::DanglingAllocation {
                allocation_id: record.id,
            });
        }
    }

    for lot in lots {
        if lot.available_quantity < 0 || lot.available_quantity > lot.total_quantity {
            violations.push(ConservationViolation::LotBounds {
                lot_id: lot.id,
                code: lot.code.clone(),
                total: lot.total_quantity,
                available: lot.available_quantity,
            });
        }
        let recorded = per_lot.get(&lot.id).copied().unwrap_or(0);
        let committed = i64::from(lot.total_quantity) - i64::from(lot.available_quantity);
        if committed != recorded {
            violations.push(ConservationViolation::LotImbalance {
                lot_id: lot.id,
                code: lot.code.clone(),
                committed,
                recorded,
            });
        }
    }

    let mut over: Vec<_> = per_item
        .into_iter()
        .filter_map(|(id, allocated)| {
            let quantity = *items.get(&id)?;
            (allocated > i64::from(quantity)).then_some(ConservationViolation::ItemOverAllocated {
                contract_item_id: id,
                quantity,
                allocated,
            })
        })
        .collect();
    over.sort_by_key(|v| match v {
        ConservationViolation::ItemOverAllocated {
            contract_item_id, ..
        } => *contract_item_id,
        _ => Uuid::nil(),
    });
    violations.extend(over);

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::lot::LotStatus;
    use chrono::{NaiveDate, Utc};

    fn lot(id: i64, total: i32, available: i32) -> lot::Model {
        let now = Utc::now();
        lot::Model {
            id,
            tenant_id: Uuid::nil(),
            asset_type_id: Uuid::nil(),
            code: format!("L-{}", id),
            total_quantity: total,
            available_quantity: available,
            acquired_on: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            unavailable: false,
            status: LotStatus::derive(false, available),
            created_at: now,
            updated_at: now,
        }
    }

    fn record(id: i64, item: Uuid, lot_id: i64, quantity: i32) -> allocation::Model {
        let now = Utc::now();
        allocation::Model {
            id,
            contract_item_id: item,
            lot_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn balanced_ledger_has_no_violations() {
        let item = Uuid::new_v4();
        let items = HashMap::from([(item, 15)]);
        let lots = vec![lot(1, 12, 0), lot(2, 10, 7)];
        let allocations = vec![record(1, item, 1, 12), record(2, item, 2, 3)];
        assert!(check(&lots, &allocations, &items).is_empty());
    }

    #[test]
    fn detects_imbalance_and_over_allocation() {
        let item = Uuid::new_v4();
        let items = HashMap::from([(item, 2)]);
        let lots = vec![lot(1, 10, 8), lot(2, 5, 6)];
        let allocations = vec![record(1, item, 1, 3)];

        let violations = check(&lots, &allocations, &items);
        assert!(violations.contains(&ConservationViolation::LotImbalance {
            lot_id: 1,
            code: "L-1".into(),
            committed: 2,
            recorded: 3,
        }));
        assert!(violations.contains(&ConservationViolation::LotBounds {
            lot_id: 2,
            code: "L-2".into(),
            total: 5,
            available: 6,
        }));
        assert!(violations.contains(&ConservationViolation::ItemOverAllocated {
            contract_item_id: item,
            quantity: 2,
            allocated: 3,
        }));
    }

    #[test]
    fn flags_records_without_a_lot() {
        let item = Uuid::new_v4();
        let items = HashMap::from([(item, 5)]);
        let violations = check(&[], &[record(7, item, 99, 1)], &items);
        assert_eq!(
            violations,
            vec![ConservationViolation::DanglingAllocation { allocation_id: 7 }]
        );
    }

    #[test]
    fn sums_records_past_the_i32_range() {
        let item = Uuid::new_v4();
        let items = HashMap::from([(item, i32::MAX)]);
        let lots = vec![lot(1, i32::MAX, 0)];
        let allocations = vec![
            record(1, item, 1, i32::MAX),
            record(2, item, 1, i32::MAX),
        ];

        let violations = check(&lots, &allocations, &items);
        assert!(violations.contains(&ConservationViolation::LotImbalance {
            lot_id: 1,
            code: "L-1".into(),
            committed: i64::from(i32::MAX),
            recorded: 2 * i64::from(i32::MAX),
        }));
        assert!(violations.contains(&ConservationViolation::ItemOverAllocated {
            contract_item_id: item,
            quantity: i32::MAX,
            allocated: 2 * i64::from(i32::MAX),
        }));
    }
}
