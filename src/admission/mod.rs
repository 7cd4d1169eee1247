// Admission control module

pub mod controller;

pub use controller::{effective_timeout, AdmissionController, AdmissionGuard, AdmissionStats};
