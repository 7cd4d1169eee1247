//! The synthesis gateway: one shared object that runs requests through the
//! cache, admission control and worker supervision, and turns failures into
//! recoveries.

pub mod maintenance;
pub mod models;
pub mod service;

pub use maintenance::PressureReport;
pub use models::{GatewayMetrics, Synthesis, SynthesisRequest};
pub use service::SynthesisGateway;
