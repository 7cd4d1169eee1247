// System probes - raw CPU, memory, disk and descriptor readings

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Disks, System};

/// Raw host readings, before smoothing and classification.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemReadings {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub open_fds: u64,
}

/// Source of host readings.
pub trait SystemProbe: Send {
    fn read(&mut self) -> SystemReadings;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    disks: Disks,
    disk_path: PathBuf,
}

impl SysinfoProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta, so prime the first reading
        system.refresh_cpu();
        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            disk_path: disk_path.into(),
        }
    }

    fn disk_percent(&mut self) -> f64 {
        self.disks.refresh();
        // Longest mount point containing the path wins
        let disk = self
            .disks
            .list()
            .iter()
            .filter(|disk| self.disk_path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());

        match disk {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space().saturating_sub(disk.available_space());
                used as f64 / disk.total_space() as f64 * 100.0
            }
            _ => 0.0,
        }
    }
}

impl SystemProbe for SysinfoProbe {
    fn read(&mut self) -> SystemReadings {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let memory_percent = if total > 0 {
            self.system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        SystemReadings {
            cpu_percent: f64::from(self.system.global_cpu_info().cpu_usage()),
            memory_percent,
            disk_percent: self.disk_percent(),
            open_fds: count_open_fds(),
        }
    }
}

/// Descriptors held by this process; zero where the platform gives no cheap count.
pub fn count_open_fds() -> u64 {
    let fd_dir = Path::new("/proc/self/fd");
    std::fs::read_dir(fd_dir)
        .map(|entries| entries.count() as u64)
        .unwrap_or(0)
}

/// Probe returning whatever readings were last set. Clones share state.
#[derive(Clone, Default)]
pub struct StaticProbe {
    readings: Arc<Mutex<SystemReadings>>,
}

impl StaticProbe {
    pub fn new(readings: SystemReadings) -> Self {
        Self {
            readings: Arc::new(Mutex::new(readings)),
        }
    }

    pub fn set(&self, readings: SystemReadings) {
        *self.readings.lock() = readings;
    }

    pub fn set_memory(&self, memory_percent: f64) {
        self.readings.lock().memory_percent = memory_percent;
    }
}

impl SystemProbe for StaticProbe {
    fn read(&mut self) -> SystemReadings {
        *self.readings.lock()
    }
}
