// Worker process supervision module

pub mod handle;
pub mod registry;
pub mod runner;

pub use handle::WorkerHandle;
pub use registry::{DrainReport, JobInfo, JobRecord, ProcessRegistry, RegistryStats};
pub use runner::{spawn_and_run, JobSpec, WorkerCommand, WorkerOutput};
