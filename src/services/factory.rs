use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        allocation::AllocationService, amendments::AmendmentService, contracts::ContractService,
        lots::LotService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    billing_days_per_month: u32,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, billing_days_per_month: u32) -> Self {
        Self {
            db_pool,
            event_sender,
            billing_days_per_month,
        }
    }

    pub fn from_config(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self::new(db_pool, event_sender, config.billing_days_per_month)
    }

    pub fn lot_service(&self) -> LotService {
        LotService::new(self.db_pool.clone())
    }

    pub fn allocation_service(&self) -> AllocationService {
        AllocationService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn contract_service(&self) -> ContractService {
        ContractService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn amendment_service(&self) -> AmendmentService {
        AmendmentService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.billing_days_per_month,
        )
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub lots: Arc<LotService>,
    pub allocations: Arc<AllocationService>,
    pub contracts: Arc<ContractService>,
    pub amendments: Arc<AmendmentService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            lots: Arc::new(factory.lot_service()),
            allocations: Arc::new(factory.allocation_service()),
            contracts: Arc::new(factory.contract_service()),
            amendments: Arc::new(factory.amendment_service()),
        }
    }
}
