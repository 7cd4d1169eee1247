//! Resource readings and their classification.

use serde::Serialize;
use std::fmt;

/// Memory percentage above which the system is exhausted.
pub const MEMORY_CRITICAL_PCT: f64 = 90.0;
pub const CPU_CRITICAL_PCT: f64 = 95.0;
pub const DISK_CRITICAL_PCT: f64 = 95.0;

pub const MEMORY_WARNING_PCT: f64 = 75.0;
pub const CPU_WARNING_PCT: f64 = 80.0;
pub const DISK_WARNING_PCT: f64 = 85.0;

/// Fraction of the job ceiling at which the system counts as busy.
pub const BUSY_RATIO: f64 = 0.9;

/// Coarse load classification driving admission and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Available,
    Limited,
    Exhausted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceStatus::Available => "available",
            ResourceStatus::Limited => "limited",
            ResourceStatus::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// One sample of system load plus the caller's concurrency counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub open_fds: u64,
    pub active_jobs: usize,
    pub max_jobs: usize,
    /// Requests waiting beyond the active ones.
    pub queue_depth: usize,
    pub avg_latency_secs: f64,
}

impl ResourceSnapshot {
    /// An idle reading with the given job ceiling.
    pub fn idle(max_jobs: usize) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            open_fds: 0,
            active_jobs: 0,
            max_jobs,
            queue_depth: 0,
            avg_latency_secs: 0.0,
        }
    }

    pub fn status(&self) -> ResourceStatus {
        if self.memory_percent > MEMORY_CRITICAL_PCT
            || self.cpu_percent > CPU_CRITICAL_PCT
            || self.disk_percent > DISK_CRITICAL_PCT
        {
            return ResourceStatus::Exhausted;
        }

        let busy = self.max_jobs > 0 && self.active_jobs as f64 >= BUSY_RATIO * self.max_jobs as f64;
        if self.memory_percent > MEMORY_WARNING_PCT
            || self.cpu_percent > CPU_WARNING_PCT
            || self.disk_percent > DISK_WARNING_PCT
            || busy
        {
            return ResourceStatus::Limited;
        }

        ResourceStatus::Available
    }
}

/// Job counts supplied by the caller when sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadCounts {
    pub active: usize,
    pub max: usize,
    pub queued: usize,
}

/// Summary of the recent latency window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub avg_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}
