//! Axum-based monitoring server for synthgate.
//!
//! Exposes read-only views of the gateway: a coarse health check, the full
//! statistics document and the Prometheus exposition.
//!
//! # Components
//!
//! - `handlers`: The `/health`, `/health/detailed` and `/metrics` endpoints.
//! - `middleware`: Correlation id propagation.
//! - `routes`: The router that ties everything together.

mod handlers;
mod middleware;
mod routes;

pub use handlers::{HealthCheck, HealthResponse, HealthStatus};
pub use middleware::CORRELATION_ID_HEADER;
pub use routes::{create_router, AppState};
