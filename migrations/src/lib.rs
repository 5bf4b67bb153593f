pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_inventory_tables;
mod m20250301_000002_create_contract_tables;
mod m20250301_000003_create_allocations_table;
mod m20250301_000004_create_amendment_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_inventory_tables::Migration),
            Box::new(m20250301_000002_create_contract_tables::Migration),
            Box::new(m20250301_000003_create_allocations_table::Migration),
            Box::new(m20250301_000004_create_amendment_tables::Migration),
        ]
    }
}
