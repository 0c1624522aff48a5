//! Shared test utilities

use sentinel_gateway::{DbPool, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Arguments of a `report_violation` call as the service sends them
#[must_use]
pub fn violation_args(plate: &str, types: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "violation_detected": true,
        "violation_type": types,
        "vehicle_number": plate,
        "vehicle_type": "bike",
    })
}
