// HTTP routes configuration

use super::handlers::{detailed_health_handler, health_handler, metrics_handler};
use super::middleware::request_id_layers;
use crate::gateway::SynthesisGateway;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<SynthesisGateway>,
}

pub fn create_router(gateway: Arc<SynthesisGateway>) -> Router {
    let state = AppState { gateway };

    let (set_request_id, propagate_request_id) = request_id_layers();

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::monitor::StaticProbe;
    use crate::server::middleware::CORRELATION_ID_HEADER;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let gateway =
            SynthesisGateway::with_probe(&AppConfig::default(), Box::new(StaticProbe::default()))
                .unwrap();
        create_router(Arc::new(gateway))
    }

    #[tokio::test]
    async fn test_health_propagates_correlation_id() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(CORRELATION_ID_HEADER, "probe-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CORRELATION_ID_HEADER], "probe-1");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_detailed_health_reports_components() {
        let response = router()
            .oneshot(Request::builder().uri("/health/detailed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["admission"]["current_limit"], 10);
        assert_eq!(json["cache"]["policy"], "lru");
        assert_eq!(json["processes"]["accepting"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        crate::metrics::record_cache_op("miss");
        let response = router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("cache_operations_total"));
    }
}
