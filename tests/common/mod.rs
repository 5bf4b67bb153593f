#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rental_allocation::{
    config::AppConfig,
    db,
    entities::{
        allocation::{self, Entity as AllocationEntity},
        asset_type, contract, contract_item,
        lot::{self, Entity as LotEntity},
    },
    events::Event,
    services::{
        contracts::{AddItemInput, CreateContractInput},
        lots::RegisterLotInput,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

/// Application state over a fresh in-memory SQLite database with the schema
/// applied. Every published event is collected for inspection.
pub struct TestApp {
    pub state: AppState,
    pub tenant_id: Uuid,
    events: Arc<Mutex<Vec<Event>>>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (state, mut rx) = AppState::new(Arc::new(pool), cfg);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.lock().unwrap().push(event);
            }
        });

        Self {
            state,
            tenant_id: Uuid::new_v4(),
            events,
            _event_task: event_task,
        }
    }

    /// Events published so far. Yields once so the collector can catch up.
    pub async fn events(&self) -> Vec<Event> {
        tokio::task::yield_now().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        self.events.lock().unwrap().clone()
    }

    pub async fn asset_type(&self, name: &str) -> asset_type::Model {
        self.state
            .services
            .lots
            .register_asset_type(self.tenant_id, name)
            .await
            .expect("register asset type")
    }

    pub async fn lot(
        &self,
        asset_type: &asset_type::Model,
        code: &str,
        quantity: i32,
        acquired_on: NaiveDate,
    ) -> lot::Model {
        self.state
            .services
            .lots
            .register_lot(RegisterLotInput {
                tenant_id: self.tenant_id,
                asset_type_id: asset_type.id,
                code: code.to_string(),
                quantity,
                acquired_on,
            })
            .await
            .expect("register lot")
    }

    pub async fn reload_lot(&self, lot_id: i64) -> lot::Model {
        LotEntity::find_by_id(lot_id)
            .one(&*self.state.db)
            .await
            .expect("load lot")
            .expect("lot exists")
    }

    /// Available quantity of each lot, in the order given.
    pub async fn availability(&self, lots: &[&lot::Model]) -> Vec<i32> {
        let mut out = Vec::new();
        for lot in lots {
            out.push(self.reload_lot(lot.id).await.available_quantity);
        }
        out
    }

    pub async fn draft_contract(&self, code: &str) -> contract::Model {
        self.state
            .services
            .contracts
            .create_contract(CreateContractInput {
                tenant_id: self.tenant_id,
                code: code.to_string(),
                start_date: date(2025, 3, 1),
                end_date: date(2025, 3, 31),
            })
            .await
            .expect("create contract")
    }

    pub async fn add_item(
        &self,
        contract: &contract::Model,
        asset_type: &asset_type::Model,
        quantity: i32,
        unit_price: Decimal,
    ) -> contract_item::Model {
        self.state
            .services
            .contracts
            .add_item(
                contract.id,
                AddItemInput {
                    asset_type_id: asset_type.id,
                    quantity,
                    unit_price,
                },
            )
            .await
            .expect("add contract item")
    }

    /// A one-line contract activated without upfront payment.
    pub async fn active_contract(
        &self,
        code: &str,
        asset_type: &asset_type::Model,
        quantity: i32,
        unit_price: Decimal,
    ) -> (contract::Model, contract_item::Model) {
        let contract = self.draft_contract(code).await;
        let item = self.add_item(&contract, asset_type, quantity, unit_price).await;
        let contract = self
            .state
            .services
            .contracts
            .activate(contract.id, false)
            .await
            .expect("activate contract");
        (contract, item)
    }

    pub async fn contract(&self, contract_id: Uuid) -> contract::Model {
        self.state
            .services
            .contracts
            .get_contract(contract_id)
            .await
            .expect("load contract")
    }

    pub async fn items(&self, contract_id: Uuid) -> Vec<contract_item::Model> {
        self.state
            .services
            .contracts
            .items(contract_id)
            .await
            .expect("load contract items")
    }

    /// Allocation records of a line item in allocation order.
    pub async fn allocations(&self, contract_item_id: Uuid) -> Vec<allocation::Model> {
        AllocationEntity::find()
            .filter(allocation::Column::ContractItemId.eq(contract_item_id))
            .order_by_asc(allocation::Column::Id)
            .all(&*self.state.db)
            .await
            .expect("load allocations")
    }

    /// `(lot id, quantity)` of each allocation record of a line item.
    pub async fn allocation_split(&self, contract_item_id: Uuid) -> Vec<(i64, i32)> {
        self.allocations(contract_item_id)
            .await
            .into_iter()
            .map(|r| (r.lot_id, r.quantity))
            .collect()
    }

    pub async fn assert_conserved(&self) {
        let violations = rental_allocation::services::audit::verify_conservation(&*self.state.db)
            .await
            .expect("audit");
        assert!(violations.is_empty(), "ledger violations: {:?}", violations);
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
