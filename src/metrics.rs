//! Prometheus counters for the allocation engine.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ALLOCATIONS: IntCounter = register_counter(
        "allocation_calls_total",
        "Total number of successful allocation calls"
    );
    pub static ref ALLOCATED_UNITS: IntCounter = register_counter(
        "allocation_units_total",
        "Total units committed from lots to line items"
    );
    pub static ref ALLOCATION_FAILURES: IntCounterVec = register_counter_vec(
        "allocation_failures_total",
        "Total number of failed allocation calls",
        &["reason"]
    );
    pub static ref RELEASES: IntCounterVec = register_counter_vec(
        "allocation_releases_total",
        "Total number of release calls",
        &["mode"]
    );
    pub static ref RELEASED_UNITS: IntCounter = register_counter(
        "allocation_released_units_total",
        "Total units returned to lots"
    );
    pub static ref AMENDMENT_OPERATIONS: IntCounterVec = register_counter_vec(
        "amendment_operations_total",
        "Amendment applies and reverts by kind",
        &["kind", "operation"]
    );
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text_output() {
        RELEASES.with_label_values(&["partial"]).inc();
        ALLOCATED_UNITS.inc_by(4);
        let text = gather_text().unwrap();
        assert!(text.contains("allocation_releases_total"));
        assert!(text.contains("allocation_units_total"));
    }
}
