// Prometheus metrics registry and collectors

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Result cache operations
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_operations_total", "Total result cache operations"),
        &["operation"], // operation: hit, miss, store, evict, expire, reject
        REGISTRY
    ).unwrap();

    /// Current cache usage
    pub static ref CACHE_USAGE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("cache_usage_current", "Current result cache usage"),
        &["unit"], // unit: items, bytes
        REGISTRY
    ).unwrap();

    // ============================================================================
    // ADMISSION METRICS
    // ============================================================================

    /// Admission attempts by outcome
    pub static ref ADMISSIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("admissions_total", "Total admission attempts"),
        &["outcome"], // outcome: granted, timeout, closed
        REGISTRY
    ).unwrap();

    /// Adaptive admission state
    pub static ref ADMISSION_STATE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("admission_state", "Adaptive admission limit and occupancy"),
        &["kind"], // kind: limit, active, waiting
        REGISTRY
    ).unwrap();

    // ============================================================================
    // WORKER METRICS
    // ============================================================================

    /// Worker process outcomes
    pub static ref WORKER_OUTCOMES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("worker_outcomes_total", "Total worker process outcomes"),
        &["outcome"], // outcome: success, failed, timeout, killed
        REGISTRY
    ).unwrap();

    /// End-to-end synthesis duration
    pub static ref SYNTHESIS_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("synthesis_duration_seconds", "Synthesis job duration")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["model", "cache"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // ERROR METRICS
    // ============================================================================

    /// Errors seen by the error handler
    pub static ref ERRORS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("errors_total", "Total classified errors"),
        &["code", "category"],
        REGISTRY
    ).unwrap();

    /// Recoveries applied by the error handler
    pub static ref RECOVERIES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("recoveries_total", "Total recoveries and degradations applied"),
        &["code", "kind"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Vec collectors only appear once a label set has been touched
        CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
        ADMISSIONS.with_label_values(&["granted"]).inc();
        WORKER_OUTCOMES.with_label_values(&["success"]).inc();

        let metrics = gather_metrics();
        assert!(metrics.contains("cache_operations_total"));
        assert!(metrics.contains("admissions_total"));
        assert!(metrics.contains("worker_outcomes_total"));
    }
}
