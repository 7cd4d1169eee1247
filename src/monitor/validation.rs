// Startup checks of host capacity

use serde::Serialize;
use std::path::Path;
use sysinfo::{Disks, System};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

const MIN_CPUS: usize = 2;
const MEMORY_ERROR_GIB: f64 = 1.0;
const MEMORY_WARN_GIB: f64 = 2.0;
const DISK_ERROR_GIB: f64 = 1.0;
const DISK_WARN_GIB: f64 = 5.0;
const MIN_NOFILE: u64 = 1024;

/// Host figures gathered during validation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostCapacity {
    pub cpu_count: usize,
    pub available_memory_gib: f64,
    pub free_disk_gib: f64,
    /// Soft limit on open files, where the platform reports one.
    pub nofile_limit: Option<u64>,
}

/// Outcome of [`validate_system_resources`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub metrics: HostCapacity,
}

/// Check that the host can reasonably run synthesis workers.
pub fn validate_system_resources(disk_path: &Path) -> ValidationReport {
    let mut system = System::new();
    system.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let free_disk = disks
        .list()
        .iter()
        .filter(|disk| disk_path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space());

    let capacity = HostCapacity {
        cpu_count: num_cpus::get(),
        available_memory_gib: system.available_memory() as f64 / GIB,
        // Unknown mounts are not reported as full
        free_disk_gib: free_disk.map_or(f64::INFINITY, |bytes| bytes as f64 / GIB),
        nofile_limit: nofile_soft_limit(),
    };

    evaluate(capacity)
}

fn evaluate(capacity: HostCapacity) -> ValidationReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if capacity.cpu_count < MIN_CPUS {
        warnings.push(format!(
            "Only {} CPU core(s) available, synthesis will be slow",
            capacity.cpu_count
        ));
    }

    if capacity.available_memory_gib < MEMORY_ERROR_GIB {
        errors.push(format!(
            "Only {:.2} GiB memory available, at least {} GiB required",
            capacity.available_memory_gib, MEMORY_ERROR_GIB
        ));
    } else if capacity.available_memory_gib < MEMORY_WARN_GIB {
        warnings.push(format!(
            "Low available memory: {:.2} GiB",
            capacity.available_memory_gib
        ));
    }

    if capacity.free_disk_gib < DISK_ERROR_GIB {
        errors.push(format!(
            "Only {:.2} GiB disk free, at least {} GiB required",
            capacity.free_disk_gib, DISK_ERROR_GIB
        ));
    } else if capacity.free_disk_gib < DISK_WARN_GIB {
        warnings.push(format!("Low free disk space: {:.2} GiB", capacity.free_disk_gib));
    }

    if let Some(limit) = capacity.nofile_limit {
        if limit < MIN_NOFILE {
            warnings.push(format!(
                "Open file limit is {}, consider raising it to at least {}",
                limit, MIN_NOFILE
            ));
        }
    }

    ValidationReport {
        passed: errors.is_empty(),
        warnings,
        errors,
        metrics: capacity,
    }
}

#[cfg(unix)]
fn nofile_soft_limit() -> Option<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the provided struct
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    (rc == 0).then_some(limit.rlim_cur as u64)
}

#[cfg(not(unix))]
fn nofile_soft_limit() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> HostCapacity {
        HostCapacity {
            cpu_count: 8,
            available_memory_gib: 16.0,
            free_disk_gib: 100.0,
            nofile_limit: Some(65536),
        }
    }

    #[test]
    fn test_healthy_host_passes_cleanly() {
        let report = evaluate(healthy());
        assert!(report.passed);
        assert!(report.warnings.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_low_memory_is_an_error() {
        let report = evaluate(HostCapacity {
            available_memory_gib: 0.5,
            ..healthy()
        });
        assert!(!report.passed);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_marginal_host_warns() {
        let report = evaluate(HostCapacity {
            cpu_count: 1,
            available_memory_gib: 1.5,
            free_disk_gib: 3.0,
            nofile_limit: Some(256),
        });
        assert!(report.passed);
        assert_eq!(report.warnings.len(), 4);
    }

    #[test]
    fn test_live_validation_reports_metrics() {
        let report = validate_system_resources(Path::new("/"));
        assert!(report.metrics.cpu_count >= 1);
    }
}
