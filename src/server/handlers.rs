// HTTP request handlers

use super::routes::AppState;
use crate::gateway::GatewayMetrics;
use crate::metrics::gather_metrics;
use crate::monitor::ResourceStatus;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cache usage share that turns the cache check into a warning.
const CACHE_FULL_RATIO: f64 = 0.9;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

impl HealthCheck {
    fn ok(message: String) -> Self {
        Self {
            status: "ok".to_string(),
            message,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            status: "warning".to_string(),
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message,
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.gateway.metrics();
    let closed = state.gateway.admission().is_closed();
    let response = evaluate_health(&metrics, closed);

    let code = match response.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(response))
}

pub async fn detailed_health_handler(State(state): State<AppState>) -> Json<GatewayMetrics> {
    Json(state.gateway.metrics())
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        gather_metrics(),
    )
}

/// Fold the gateway statistics into per-component checks and an overall status.
fn evaluate_health(metrics: &GatewayMetrics, admission_closed: bool) -> HealthResponse {
    let mut checks = HashMap::new();
    let mut overall = HealthStatus::Healthy;

    let snapshot = &metrics.snapshot;
    let usage = format!(
        "cpu {:.1}%, memory {:.1}%, disk {:.1}%, {} of {} jobs active",
        snapshot.cpu_percent,
        snapshot.memory_percent,
        snapshot.disk_percent,
        snapshot.active_jobs,
        snapshot.max_jobs
    );
    let resources = match metrics.status {
        ResourceStatus::Available => HealthCheck::ok(usage),
        ResourceStatus::Limited => {
            overall = overall.max(HealthStatus::Degraded);
            HealthCheck::warning(usage)
        }
        ResourceStatus::Exhausted => {
            overall = overall.max(HealthStatus::Unhealthy);
            HealthCheck::error(usage)
        }
    };
    checks.insert("resources".to_string(), resources);

    let admission = &metrics.admission;
    let admission_check = if admission_closed || !metrics.processes.accepting {
        overall = overall.max(HealthStatus::Unhealthy);
        HealthCheck::error("Shutting down, not accepting jobs".to_string())
    } else if admission.waiting > 0 {
        overall = overall.max(HealthStatus::Degraded);
        HealthCheck::warning(format!(
            "{} jobs waiting, limit {} fully used",
            admission.waiting, admission.current_limit
        ))
    } else {
        HealthCheck::ok(format!(
            "{} of {} slots in use",
            admission.active, admission.current_limit
        ))
    };
    checks.insert("admission".to_string(), admission_check);

    let cache = &metrics.cache;
    let cache_check = if !cache.enabled {
        HealthCheck::ok("Cache disabled".to_string())
    } else {
        let message = format!(
            "{} items, {} bytes, hit rate {:.1}%",
            cache.items,
            cache.bytes,
            cache.hit_rate * 100.0
        );
        let bytes_full = cache.bytes as f64 >= cache.max_bytes as f64 * CACHE_FULL_RATIO;
        let items_full = cache.items as f64 >= cache.max_items as f64 * CACHE_FULL_RATIO;
        if bytes_full || items_full {
            overall = overall.max(HealthStatus::Degraded);
            HealthCheck::warning(message)
        } else {
            HealthCheck::ok(message)
        }
    };
    checks.insert("cache".to_string(), cache_check);

    HealthResponse {
        status: overall,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::gateway::SynthesisGateway;
    use crate::monitor::{StaticProbe, SystemReadings};

    fn gateway(readings: SystemReadings) -> SynthesisGateway {
        SynthesisGateway::with_probe(&AppConfig::default(), Box::new(StaticProbe::new(readings)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_gateway_is_healthy() {
        let gateway = gateway(SystemReadings::default());
        let response = evaluate_health(&gateway.metrics(), false);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.checks["resources"].status, "ok");
        assert_eq!(response.checks["admission"].status, "ok");
        assert_eq!(response.checks["cache"].status, "ok");
    }

    #[tokio::test]
    async fn test_memory_pressure_degrades_then_fails() {
        let limited = gateway(SystemReadings {
            memory_percent: 80.0,
            ..Default::default()
        });
        let response = evaluate_health(&limited.metrics(), false);
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.checks["resources"].status, "warning");

        let exhausted = gateway(SystemReadings {
            memory_percent: 95.0,
            ..Default::default()
        });
        let response = evaluate_health(&exhausted.metrics(), false);
        assert_eq!(response.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_closed_admission_is_unhealthy() {
        let gateway = gateway(SystemReadings::default());
        gateway.shutdown(std::time::Duration::from_secs(1)).await;
        let response = evaluate_health(&gateway.metrics(), gateway.admission().is_closed());
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.checks["admission"].status, "error");
    }
}
