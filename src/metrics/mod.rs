// Metrics module for Prometheus observability

mod registry;

pub use registry::{
    gather_metrics, ADMISSIONS, ADMISSION_STATE, CACHE_OPERATIONS, CACHE_USAGE, ERRORS,
    RECOVERIES, SYNTHESIS_DURATION, WORKER_OUTCOMES,
};

/// Helper to record result cache operations
pub fn record_cache_op(operation: &str) {
    CACHE_OPERATIONS.with_label_values(&[operation]).inc();
}

pub fn update_cache_usage(items: usize, bytes: usize) {
    CACHE_USAGE.with_label_values(&["items"]).set(items as f64);
    CACHE_USAGE.with_label_values(&["bytes"]).set(bytes as f64);
}

/// Helper to record admission outcomes
pub fn record_admission(outcome: &str) {
    ADMISSIONS.with_label_values(&[outcome]).inc();
}

pub fn update_admission_state(limit: usize, active: usize, waiting: usize) {
    ADMISSION_STATE.with_label_values(&["limit"]).set(limit as f64);
    ADMISSION_STATE.with_label_values(&["active"]).set(active as f64);
    ADMISSION_STATE.with_label_values(&["waiting"]).set(waiting as f64);
}

/// Helper to record worker process outcomes
pub fn record_worker_outcome(outcome: &str) {
    WORKER_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_synthesis(model: &str, cache_hit: bool, duration_secs: f64) {
    let cache = if cache_hit { "hit" } else { "miss" };
    SYNTHESIS_DURATION
        .with_label_values(&[model, cache])
        .observe(duration_secs);
}

/// Helper to record classified errors
pub fn record_error(code: &str, category: &str) {
    ERRORS.with_label_values(&[code, category]).inc();
}

pub fn record_recovery(code: &str, kind: &str) {
    RECOVERIES.with_label_values(&[code, kind]).inc();
}
