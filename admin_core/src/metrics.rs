//! Prometheus metrics for admin operations.

use metrics::{counter, histogram};

/// Record a handled admin operation.
pub fn admin_request(model: &str, operation: &str, duration_ms: u64) {
    counter!(
        "admin_requests_total",
        "model" => model.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
    histogram!("admin_request_duration_ms", "operation" => operation.to_string())
        .record(duration_ms as f64);
}

/// Record rows written by a mutation.
pub fn records_written(model: &str, operation: &str, count: usize) {
    counter!(
        "admin_records_written_total",
        "model" => model.to_string(),
        "operation" => operation.to_string()
    )
    .increment(count as u64);
}

/// Record a rejected payload.
pub fn validation_failed(model: &str) {
    counter!("admin_validation_failures_total", "model" => model.to_string()).increment(1);
}

/// Record a policy denial.
pub fn authorization_denied(model: &str, ability: &str) {
    counter!(
        "admin_authorization_denied_total",
        "model" => model.to_string(),
        "ability" => ability.to_string()
    )
    .increment(1);
}
