// Resource monitor - samples host load and tracks job latency

use crate::monitor::models::{LatencyStats, LoadCounts, ResourceSnapshot};
use crate::monitor::probe::SystemProbe;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Weight of the newest CPU reading in the smoothed value.
const CPU_EWMA_ALPHA: f64 = 0.3;

/// The latency window is trimmed to `LATENCY_KEEP` once it grows past `LATENCY_WINDOW_MAX`.
const LATENCY_WINDOW_MAX: usize = 1000;
const LATENCY_KEEP: usize = 500;

/// Trailing samples averaged into a snapshot.
const LATENCY_AVG_SAMPLES: usize = 100;

const MEMORY_HISTORY_POINTS: usize = 60;

/// One memory reading kept for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryPoint {
    pub timestamp: DateTime<Utc>,
    pub percent: f64,
}

#[derive(Default)]
struct MonitorState {
    smoothed_cpu: Option<f64>,
    latencies: Vec<f64>,
    memory_history: VecDeque<MemoryPoint>,
    last_snapshot: Option<ResourceSnapshot>,
}

/// Pull-based sampler of host and job load.
pub struct ResourceMonitor {
    probe: Mutex<Box<dyn SystemProbe>>,
    state: Mutex<MonitorState>,
    started_at: Instant,
}

impl ResourceMonitor {
    pub fn new(probe: Box<dyn SystemProbe>) -> Self {
        Self {
            probe: Mutex::new(probe),
            state: Mutex::new(MonitorState::default()),
            started_at: Instant::now(),
        }
    }

    /// Take a fresh reading and combine it with the caller's job counts.
    pub fn sample(&self, counts: LoadCounts) -> ResourceSnapshot {
        let readings = self.probe.lock().read();
        let mut state = self.state.lock();

        let cpu_percent = match state.smoothed_cpu {
            Some(previous) => CPU_EWMA_ALPHA.mul_add(readings.cpu_percent, (1.0 - CPU_EWMA_ALPHA) * previous),
            None => readings.cpu_percent,
        };
        state.smoothed_cpu = Some(cpu_percent);

        let snapshot = ResourceSnapshot {
            cpu_percent,
            memory_percent: readings.memory_percent,
            disk_percent: readings.disk_percent,
            open_fds: readings.open_fds,
            active_jobs: counts.active,
            max_jobs: counts.max,
            queue_depth: counts.queued,
            avg_latency_secs: trailing_average(&state.latencies),
        };
        state.last_snapshot = Some(snapshot);

        trace!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            disk = snapshot.disk_percent,
            status = %snapshot.status(),
            "Resource sample"
        );
        snapshot
    }

    /// Most recent snapshot, if any sample has been taken.
    pub fn last_snapshot(&self) -> Option<ResourceSnapshot> {
        self.state.lock().last_snapshot
    }

    /// Record the wall-clock duration of one finished job.
    pub fn record_latency(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.latencies.push(duration.as_secs_f64());
        if state.latencies.len() > LATENCY_WINDOW_MAX {
            let excess = state.latencies.len() - LATENCY_KEEP;
            state.latencies.drain(..excess);
        }
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let state = self.state.lock();
        let window = &state.latencies;
        if window.is_empty() {
            return LatencyStats::default();
        }

        LatencyStats {
            samples: window.len(),
            avg_secs: trailing_average(window),
            min_secs: window.iter().copied().fold(f64::INFINITY, f64::min),
            max_secs: window.iter().copied().fold(0.0, f64::max),
        }
    }

    /// Append a memory reading to the bounded history.
    pub fn record_memory(&self, percent: f64) {
        let mut state = self.state.lock();
        if state.memory_history.len() == MEMORY_HISTORY_POINTS {
            state.memory_history.pop_front();
        }
        state.memory_history.push_back(MemoryPoint {
            timestamp: Utc::now(),
            percent,
        });
    }

    pub fn memory_history(&self) -> Vec<MemoryPoint> {
        self.state.lock().memory_history.iter().cloned().collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn trailing_average(window: &[f64]) -> f64 {
    let recent = &window[window.len().saturating_sub(LATENCY_AVG_SAMPLES)..];
    if recent.is_empty() {
        return 0.0;
    }
    recent.iter().sum::<f64>() / recent.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::models::ResourceStatus;
    use crate::monitor::probe::{StaticProbe, SystemReadings};

    fn monitor_with(readings: SystemReadings) -> (ResourceMonitor, StaticProbe) {
        let probe = StaticProbe::new(readings);
        (ResourceMonitor::new(Box::new(probe.clone())), probe)
    }

    #[test]
    fn test_sample_carries_counts() {
        let (monitor, _) = monitor_with(SystemReadings::default());
        let snapshot = monitor.sample(LoadCounts { active: 3, max: 10, queued: 2 });
        assert_eq!(snapshot.active_jobs, 3);
        assert_eq!(snapshot.max_jobs, 10);
        assert_eq!(snapshot.queue_depth, 2);
        assert_eq!(snapshot.status(), ResourceStatus::Available);
        assert_eq!(monitor.last_snapshot(), Some(snapshot));
    }

    #[test]
    fn test_memory_pressure_reported_unsmoothed() {
        let (monitor, probe) = monitor_with(SystemReadings::default());
        monitor.sample(LoadCounts::default());
        probe.set_memory(96.0);
        let snapshot = monitor.sample(LoadCounts::default());
        assert_eq!(snapshot.status(), ResourceStatus::Exhausted);
    }

    #[test]
    fn test_cpu_is_smoothed() {
        let (monitor, probe) = monitor_with(SystemReadings::default());
        monitor.sample(LoadCounts::default());
        probe.set(SystemReadings { cpu_percent: 100.0, ..Default::default() });
        let snapshot = monitor.sample(LoadCounts::default());
        assert!((snapshot.cpu_percent - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_window_trimmed() {
        let (monitor, _) = monitor_with(SystemReadings::default());
        for _ in 0..1001 {
            monitor.record_latency(Duration::from_secs(1));
        }
        assert_eq!(monitor.latency_stats().samples, 500);
    }

    #[test]
    fn test_average_uses_recent_samples() {
        let (monitor, _) = monitor_with(SystemReadings::default());
        for _ in 0..200 {
            monitor.record_latency(Duration::from_secs(10));
        }
        for _ in 0..100 {
            monitor.record_latency(Duration::from_millis(500));
        }
        let snapshot = monitor.sample(LoadCounts::default());
        assert!((snapshot.avg_latency_secs - 0.5).abs() < 1e-9);

        let stats = monitor.latency_stats();
        assert_eq!(stats.max_secs, 10.0);
        assert_eq!(stats.min_secs, 0.5);
    }

    #[test]
    fn test_memory_history_bounded() {
        let (monitor, _) = monitor_with(SystemReadings::default());
        for i in 0..75 {
            monitor.record_memory(i as f64);
        }
        let history = monitor.memory_history();
        assert_eq!(history.len(), 60);
        assert_eq!(history[0].percent, 15.0);
    }
}
