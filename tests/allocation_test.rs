mod common;

use assert_matches::assert_matches;
use common::{date, TestApp};
use rental_allocation::{
    entities::lot::LotStatus,
    errors::ServiceError,
    events::Event,
    services::{allocation, MAX_QUANTITY},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn lot_totals_past_the_i32_range_still_allocate() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let first = app.lot(&scaffold, "A", MAX_QUANTITY, date(2024, 1, 1)).await;
    let second = app.lot(&scaffold, "B", MAX_QUANTITY, date(2024, 2, 1)).await;
    let third = app.lot(&scaffold, "C", MAX_QUANTITY, date(2024, 3, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 1, dec!(1.00)).await;

    assert_eq!(app.allocation_split(item.id).await, vec![(first.id, 1)]);
    assert_eq!(
        app.availability(&[&first, &second, &third]).await,
        vec![MAX_QUANTITY - 1, MAX_QUANTITY, MAX_QUANTITY]
    );
    let summary = app
        .state
        .services
        .lots
        .availability(app.tenant_id, scaffold.id)
        .await
        .unwrap();
    assert_eq!(summary.total, 3 * i64::from(MAX_QUANTITY));
    assert_eq!(summary.eligible, 3 * i64::from(MAX_QUANTITY) - 1);
    app.assert_conserved().await;
}

#[tokio::test]
async fn allocates_oldest_lot_first() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot_a = app.lot(&scaffold, "A", 12, date(2024, 3, 1)).await;
    let lot_b = app.lot(&scaffold, "B", 10, date(2025, 2, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 15, dec!(2.50)).await;

    assert_eq!(app.availability(&[&lot_a, &lot_b]).await, vec![0, 7]);
    assert_eq!(
        app.allocation_split(item.id).await,
        vec![(lot_a.id, 12), (lot_b.id, 3)]
    );
    assert_eq!(app.reload_lot(lot_a.id).await.status, LotStatus::Exhausted);
    assert_eq!(app.reload_lot(lot_b.id).await.status, LotStatus::Available);
    app.assert_conserved().await;
}

#[tokio::test]
async fn registration_order_breaks_acquisition_ties() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    // Registered first but acquired later than both others.
    let late = app.lot(&scaffold, "LATE", 5, date(2025, 1, 10)).await;
    let first = app.lot(&scaffold, "FIRST", 4, date(2025, 1, 1)).await;
    let second = app.lot(&scaffold, "SECOND", 4, date(2025, 1, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 6, dec!(1.00)).await;

    assert_eq!(
        app.allocation_split(item.id).await,
        vec![(first.id, 4), (second.id, 2)]
    );
    assert_eq!(app.availability(&[&late]).await, vec![5]);
}

#[tokio::test]
async fn shortfall_fails_without_touching_lots() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot_a = app.lot(&scaffold, "A", 12, date(2024, 3, 1)).await;
    let lot_b = app.lot(&scaffold, "B", 10, date(2025, 2, 1)).await;

    let contract = app.draft_contract("C-1").await;
    let item = app.add_item(&contract, &scaffold, 30, dec!(2.50)).await;

    let err = allocation::allocate(&*app.state.db, app.tenant_id, &item, 30)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::QuantityUnavailable {
            requested: 30,
            available: 22
        }
    );

    assert_eq!(app.availability(&[&lot_a, &lot_b]).await, vec![12, 10]);
    assert!(app.allocations(item.id).await.is_empty());
    app.assert_conserved().await;
}

#[tokio::test]
async fn allocating_exactly_everything_empties_every_lot() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot_a = app.lot(&scaffold, "A", 12, date(2024, 3, 1)).await;
    let lot_b = app.lot(&scaffold, "B", 10, date(2025, 2, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 22, dec!(1.00)).await;

    assert_eq!(app.availability(&[&lot_a, &lot_b]).await, vec![0, 0]);
    assert_eq!(app.allocations(item.id).await.len(), 2);
    app.assert_conserved().await;
}

#[tokio::test]
async fn one_unit_over_the_total_changes_nothing() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot_a = app.lot(&scaffold, "A", 12, date(2024, 3, 1)).await;
    let lot_b = app.lot(&scaffold, "B", 10, date(2025, 2, 1)).await;

    let contract = app.draft_contract("C-1").await;
    app.add_item(&contract, &scaffold, 23, dec!(1.00)).await;

    let err = app
        .state
        .services
        .contracts
        .activate(contract.id, false)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::QuantityUnavailable {
            requested: 23,
            available: 22
        }
    );
    assert_eq!(app.availability(&[&lot_a, &lot_b]).await, vec![12, 10]);
}

#[tokio::test]
async fn unavailable_lots_are_skipped() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let old = app.lot(&scaffold, "OLD", 8, date(2024, 1, 1)).await;
    let new = app.lot(&scaffold, "NEW", 8, date(2025, 1, 1)).await;
    app.state
        .services
        .lots
        .set_unavailable(old.id, true)
        .await
        .unwrap();

    let (_, item) = app.active_contract("C-1", &scaffold, 5, dec!(1.00)).await;

    assert_eq!(app.allocation_split(item.id).await, vec![(new.id, 5)]);
    assert_eq!(app.availability(&[&old, &new]).await, vec![8, 3]);
}

#[tokio::test]
async fn lots_of_other_tenants_and_asset_types_are_ignored() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let plank = app.asset_type("Plank").await;
    app.lot(&plank, "P", 50, date(2024, 1, 1)).await;
    let own = app.lot(&scaffold, "S", 5, date(2025, 1, 1)).await;

    let contract = app.draft_contract("C-1").await;
    let item = app.add_item(&contract, &scaffold, 5, dec!(1.00)).await;

    let err = allocation::allocate(&*app.state.db, Uuid::new_v4(), &item, 5)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::QuantityUnavailable { available: 0, .. });

    let records = allocation::allocate(&*app.state.db, app.tenant_id, &item, 5)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lot_id, own.id);
}

#[tokio::test]
async fn allocation_never_exceeds_the_line_quantity() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    app.lot(&scaffold, "A", 40, date(2024, 1, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 10, dec!(1.00)).await;

    let err = app
        .state
        .services
        .allocations
        .allocate(item.id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    let err = allocation::allocate(&*app.state.db, app.tenant_id, &item, 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn standalone_allocation_requires_a_committed_contract() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    app.lot(&scaffold, "A", 10, date(2024, 1, 1)).await;

    let contract = app.draft_contract("C-1").await;
    let item = app.add_item(&contract, &scaffold, 3, dec!(1.00)).await;

    let err = app
        .state
        .services
        .allocations
        .allocate(item.id, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ContractNotActive { .. });
}

#[tokio::test]
async fn standalone_allocation_publishes_lots_touched() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot_a = app.lot(&scaffold, "A", 2, date(2024, 1, 1)).await;
    let lot_b = app.lot(&scaffold, "B", 10, date(2025, 1, 1)).await;

    let (_, item) = app.active_contract("C-1", &scaffold, 4, dec!(1.00)).await;
    let released = app
        .state
        .services
        .allocations
        .release_partial(item.id, 3)
        .await
        .unwrap();
    assert_eq!(released, 3);

    app.state
        .services
        .allocations
        .allocate(item.id, 3)
        .await
        .unwrap();

    // Lot A went back to 1 free unit after the LIFO release took B's 2 and one of A's.
    let events = app.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::LotsAllocated { contract_item_id, quantity: 3, lots }
            if *contract_item_id == item.id && *lots == vec![lot_a.id, lot_b.id]
    )));
    app.assert_conserved().await;
}

#[tokio::test]
async fn concurrent_activations_never_overcommit() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot = app.lot(&scaffold, "A", 10, date(2024, 1, 1)).await;

    let mut contracts = Vec::new();
    for n in 0..20 {
        let contract = app.draft_contract(&format!("C-{}", n)).await;
        app.add_item(&contract, &scaffold, 1, dec!(1.00)).await;
        contracts.push(contract.id);
    }

    let mut tasks = Vec::new();
    for id in contracts {
        let service = app.state.services.contracts.clone();
        tasks.push(tokio::spawn(async move { service.activate(id, false).await.is_ok() }));
    }
    let mut activated = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            activated += 1;
        }
    }

    assert_eq!(activated, 10);
    assert_eq!(app.reload_lot(lot.id).await.available_quantity, 0);
    app.assert_conserved().await;
}
