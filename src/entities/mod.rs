pub mod allocation;
pub mod amendment;
pub mod amendment_item;
pub mod asset_type;
pub mod contract;
pub mod contract_item;
pub mod lot;
