mod common;

use assert_matches::assert_matches;
use common::{date, TestApp};
use rental_allocation::{
    entities::contract::ContractStatus,
    errors::ServiceError,
    events::Event,
    services::contracts::CreateContractInput,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn draft_totals_follow_items() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let plank = app.asset_type("Plank").await;

    let contract = app.draft_contract("C-1").await;
    let frame_line = app.add_item(&contract, &scaffold, 4, dec!(2.50)).await;
    app.add_item(&contract, &plank, 10, dec!(0.25)).await;

    // 30 rental days: 4 × 2.50 × 30 + 10 × 0.25 × 30
    assert_eq!(frame_line.line_total, dec!(300.00));
    let reloaded = app.contract(contract.id).await;
    assert_eq!(reloaded.items_total, dec!(375.00));
    assert_eq!(reloaded.total_value, dec!(375.00));

    app.state
        .services
        .contracts
        .update_item_quantity(frame_line.id, 2)
        .await
        .unwrap();
    assert_eq!(app.contract(contract.id).await.total_value, dec!(225.00));

    app.state
        .services
        .contracts
        .remove_item(frame_line.id)
        .await
        .unwrap();
    assert_eq!(app.contract(contract.id).await.total_value, dec!(75.00));
    assert_eq!(app.items(contract.id).await.len(), 1);
}

#[tokio::test]
async fn end_date_must_follow_start_date() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .contracts
        .create_contract(CreateContractInput {
            tenant_id: app.tenant_id,
            code: "C-1".into(),
            start_date: date(2025, 3, 1),
            end_date: date(2025, 3, 1),
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn one_line_per_asset_type() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let contract = app.draft_contract("C-1").await;
    app.add_item(&contract, &scaffold, 4, dec!(2.50)).await;

    let err = app
        .state
        .services
        .contracts
        .add_item(
            contract.id,
            rental_allocation::services::contracts::AddItemInput {
                asset_type_id: scaffold.id,
                quantity: 1,
                unit_price: dec!(2.50),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn activation_is_all_or_nothing() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let plank = app.asset_type("Plank").await;
    let frames = app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;
    let planks = app.lot(&plank, "P", 5, date(2024, 1, 1)).await;

    let contract = app.draft_contract("C-1").await;
    let frame_line = app.add_item(&contract, &scaffold, 8, dec!(1.00)).await;
    app.add_item(&contract, &plank, 6, dec!(1.00)).await;

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
            requested: 6,
            available: 5
        }
    );

    assert_eq!(app.contract(contract.id).await.status, ContractStatus::Draft);
    assert_eq!(app.availability(&[&frames, &planks]).await, vec![10, 5]);
    assert!(app.allocations(frame_line.id).await.is_empty());
    app.assert_conserved().await;
}

#[tokio::test]
async fn only_drafts_with_items_activate() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;

    let empty = app.draft_contract("EMPTY").await;
    assert_matches!(
        app.state.services.contracts.activate(empty.id, false).await,
        Err(ServiceError::ValidationError(_))
    );

    let (active, _) = app.active_contract("C-1", &scaffold, 2, dec!(1.00)).await;
    let err = app
        .state
        .services
        .contracts
        .activate(active.id, false)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::ContractNotActivatable {
            status: ContractStatus::Active,
            ..
        }
    );
}

#[tokio::test]
async fn upfront_payment_waits_with_inventory_held() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot = app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;

    let contract = app.draft_contract("C-1").await;
    app.add_item(&contract, &scaffold, 4, dec!(1.00)).await;
    let contract = app
        .state
        .services
        .contracts
        .activate(contract.id, true)
        .await
        .unwrap();

    assert_eq!(contract.status, ContractStatus::AwaitingPayment);
    assert!(contract.requires_upfront_payment);
    assert_eq!(app.reload_lot(lot.id).await.available_quantity, 6);

    let contract = app
        .state
        .services
        .contracts
        .confirm_payment(contract.id)
        .await
        .unwrap();
    assert_eq!(contract.status, ContractStatus::Active);

    assert_matches!(
        app.state.services.contracts.confirm_payment(contract.id).await,
        Err(ServiceError::ContractNotActivatable { .. })
    );

    let events = app.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ContractActivated {
            status: ContractStatus::AwaitingPayment,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ContractPaymentConfirmed(id) if *id == contract.id)));
}

#[tokio::test]
async fn canceling_awaiting_payment_releases_inventory() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot = app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;

    let contract = app.draft_contract("C-1").await;
    app.add_item(&contract, &scaffold, 4, dec!(1.00)).await;
    app.state
        .services
        .contracts
        .activate(contract.id, true)
        .await
        .unwrap();

    let canceled = app
        .state
        .services
        .contracts
        .cancel(contract.id)
        .await
        .unwrap();
    assert_eq!(canceled.status, ContractStatus::Canceled);
    assert!(canceled.closed_at.is_some());
    assert_eq!(app.reload_lot(lot.id).await.available_quantity, 10);
}

#[tokio::test]
async fn finalizing_returns_inventory_and_keeps_lines() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    let lot = app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;
    let (contract, item) = app.active_contract("C-1", &scaffold, 7, dec!(1.00)).await;

    let finalized = app
        .state
        .services
        .contracts
        .finalize(contract.id)
        .await
        .unwrap();

    assert_eq!(finalized.status, ContractStatus::Finalized);
    assert_eq!(app.reload_lot(lot.id).await.available_quantity, 10);
    assert!(app.allocations(item.id).await.is_empty());
    assert_eq!(app.items(contract.id).await.len(), 1);
    app.assert_conserved().await;

    let events = app.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ContractClosed {
            status: ContractStatus::Finalized,
            ..
        }
    )));
}

#[tokio::test]
async fn closing_follows_the_transition_table() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;

    let draft = app.draft_contract("DRAFT").await;
    assert_matches!(
        app.state.services.contracts.finalize(draft.id).await,
        Err(ServiceError::ContractNotClosable {
            status: ContractStatus::Draft,
            ..
        })
    );
    let canceled = app.state.services.contracts.cancel(draft.id).await.unwrap();
    assert_eq!(canceled.status, ContractStatus::Canceled);
    assert_matches!(
        app.state.services.contracts.cancel(draft.id).await,
        Err(ServiceError::ContractNotClosable {
            status: ContractStatus::Canceled,
            ..
        })
    );

    let (active, _) = app.active_contract("C-1", &scaffold, 2, dec!(1.00)).await;
    app.state.services.contracts.finalize(active.id).await.unwrap();
    assert_matches!(
        app.state.services.contracts.cancel(active.id).await,
        Err(ServiceError::ContractNotClosable {
            status: ContractStatus::Finalized,
            ..
        })
    );
}

#[tokio::test]
async fn active_contracts_cannot_be_edited() {
    let app = TestApp::new().await;
    let scaffold = app.asset_type("Scaffold frame").await;
    app.lot(&scaffold, "F", 10, date(2024, 1, 1)).await;
    let (_, item) = app.active_contract("C-1", &scaffold, 2, dec!(1.00)).await;

    assert_matches!(
        app.state
            .services
            .contracts
            .update_item_quantity(item.id, 5)
            .await,
        Err(ServiceError::ContractNotEditable {
            status: ContractStatus::Active,
            ..
        })
    );
    assert_matches!(
        app.state.services.contracts.remove_item(item.id).await,
        Err(ServiceError::ContractNotEditable { .. })
    );
}
