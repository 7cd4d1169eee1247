// Resource monitoring module

pub mod manager;
pub mod models;
pub mod probe;
pub mod validation;

pub use manager::{MemoryPoint, ResourceMonitor};
pub use models::{LatencyStats, LoadCounts, ResourceSnapshot, ResourceStatus};
pub use probe::{StaticProbe, SysinfoProbe, SystemProbe, SystemReadings};
pub use validation::{validate_system_resources, HostCapacity, ValidationReport};
