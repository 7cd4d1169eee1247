// Error recovery module

pub mod handler;
pub mod models;
pub mod strategies;

pub use handler::ErrorHandler;
pub use models::{ErrorContext, ErrorRecord, ErrorStats, Recovery, Resolution};
pub use strategies::{
    DegradationPolicy, ModelNotFoundFallback, RecoveryStrategy, ResourceExhaustedBackoff,
};
