// Allocation engine
pub mod allocation;
pub mod release;

// Contract lifecycle and amendments
pub mod amendments;
pub mod contracts;
pub mod pricing;

// Inventory management
pub mod audit;
pub mod lots;

// Service factory for dependency injection
pub mod factory;

use crate::errors::ServiceError;

/// Largest quantity a lot, contract line or amendment item may hold.
pub const MAX_QUANTITY: i32 = 1_000_000_000;

/// Grows a stored quantity by `delta`, rejecting results past
/// [`MAX_QUANTITY`].
pub(crate) fn grow_quantity(current: i32, delta: i32) -> Result<i32, ServiceError> {
    current
        .checked_add(delta)
        .filter(|q| *q <= MAX_QUANTITY)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Quantity {} plus {} exceeds the maximum of {}",
                current, delta, MAX_QUANTITY
            ))
        })
}
