// Process registry - in-flight worker bookkeeping, reaping and shutdown drain

use crate::error::{ErrorCode, Result, SynthError};
use crate::metrics;
use crate::process::handle::WorkerHandle;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Most jobs one escalation sweep may kill.
const ESCALATION_BATCH: usize = 2;

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// One running worker.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub correlation_id: String,
    pub started_at: Instant,
    pub timeout: Duration,
    pub handle: WorkerHandle,
    pub model: String,
    pub input_len: usize,
}

impl JobRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        timeout: Duration,
        handle: WorkerHandle,
        model: impl Into<String>,
        input_len: usize,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            started_at: Instant::now(),
            timeout,
            handle,
            model: model.into(),
            input_len,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    fn info(&self, now: Instant) -> JobInfo {
        let elapsed = self.elapsed(now).as_secs_f64();
        let timeout = self.timeout.as_secs_f64();
        JobInfo {
            correlation_id: self.correlation_id.clone(),
            pid: self.handle.pid(),
            model: self.model.clone(),
            input_len: self.input_len,
            elapsed_secs: elapsed,
            timeout_secs: timeout,
            timeout_percent: if timeout > 0.0 { elapsed / timeout * 100.0 } else { 100.0 },
        }
    }
}

/// Serializable view of a running job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub correlation_id: String,
    pub pid: u32,
    pub model: String,
    pub input_len: usize,
    pub elapsed_secs: f64,
    pub timeout_secs: f64,
    pub timeout_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub accepting: bool,
    pub active_jobs: usize,
    pub total_registered: u64,
    pub timeouts: u64,
    pub forced_kills: u64,
    pub jobs: Vec<JobInfo>,
}

/// Outcome of a shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub terminated: usize,
    pub killed: usize,
}

/// Tracks running workers and is the only place that terminates them.
pub struct ProcessRegistry {
    jobs: Mutex<HashMap<String, JobRecord>>,
    accepting: AtomicBool,
    reaper_interval: Duration,
    total_registered: AtomicU64,
    timeouts: AtomicU64,
    forced_kills: AtomicU64,
}

impl ProcessRegistry {
    pub fn new(reaper_interval: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            reaper_interval,
            total_registered: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            forced_kills: AtomicU64::new(0),
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        self.reaper_interval
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Start tracking a worker. Once draining, the worker is terminated instead.
    pub fn register(&self, job: JobRecord) -> Result<()> {
        let mut jobs = self.jobs.lock();
        // Checked under the lock so a drain cannot miss this job
        if !self.is_accepting() {
            drop(jobs);
            job.handle.kill();
            return Err(SynthError::new(
                ErrorCode::ResourceExhausted,
                "Shutting down, not accepting new jobs",
            )
            .with_correlation_id(job.correlation_id));
        }

        debug!(
            correlation_id = %job.correlation_id,
            pid = job.handle.pid(),
            timeout_secs = job.timeout.as_secs_f64(),
            "Worker registered"
        );
        if let Some(previous) = jobs.insert(job.correlation_id.clone(), job) {
            warn!(correlation_id = %previous.correlation_id, "Replaced job with duplicate correlation id");
        }
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop tracking a job. `None` means it was already reaped or killed.
    pub fn unregister(&self, correlation_id: &str) -> Option<JobRecord> {
        self.jobs.lock().remove(correlation_id)
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.jobs.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminate and forget every job past its timeout.
    /// Returns the correlation ids reaped.
    pub fn reap_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<JobRecord> = {
            let mut jobs = self.jobs.lock();
            let ids: Vec<String> = jobs
                .values()
                .filter(|job| job.elapsed(now) > job.timeout)
                .map(|job| job.correlation_id.clone())
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for job in &expired {
            job.handle.terminate();
            metrics::record_worker_outcome("timeout");
            warn!(
                correlation_id = %job.correlation_id,
                pid = job.handle.pid(),
                model = %job.model,
                elapsed_secs = job.elapsed(now).as_secs_f64(),
                timeout_secs = job.timeout.as_secs_f64(),
                "Worker timed out, terminated"
            );
        }
        self.timeouts.fetch_add(expired.len() as u64, Ordering::Relaxed);

        expired.into_iter().map(|job| job.correlation_id).collect()
    }

    /// Kill the oldest jobs running past twice their timeout, at most two per call.
    pub fn escalate(&self) -> usize {
        let now = Instant::now();
        let victims: Vec<JobRecord> = {
            let mut jobs = self.jobs.lock();
            let mut overdue: Vec<&JobRecord> = jobs
                .values()
                .filter(|job| job.elapsed(now) > job.timeout * 2)
                .collect();
            overdue.sort_by_key(|job| job.started_at);
            let ids: Vec<String> = overdue
                .into_iter()
                .take(ESCALATION_BATCH)
                .map(|job| job.correlation_id.clone())
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for job in &victims {
            job.handle.kill();
            metrics::record_worker_outcome("killed");
            warn!(
                correlation_id = %job.correlation_id,
                pid = job.handle.pid(),
                elapsed_secs = job.elapsed(now).as_secs_f64(),
                "Worker force-killed under memory pressure"
            );
        }
        self.forced_kills.fetch_add(victims.len() as u64, Ordering::Relaxed);
        victims.len()
    }

    /// Kill one job immediately if it is still tracked.
    pub fn force_terminate(&self, correlation_id: &str) -> bool {
        let Some(job) = self.unregister(correlation_id) else {
            return false;
        };
        job.handle.kill();
        self.forced_kills.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_outcome("killed");
        warn!(correlation_id, pid = job.handle.pid(), "Worker force-terminated");
        true
    }

    /// Reap on a fixed cadence until cancelled.
    pub async fn run_reaper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.reaper_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.reaper_interval.as_millis() as u64, "Process reaper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = self.reap_expired();
                    if !reaped.is_empty() {
                        debug!(count = reaped.len(), "Reaper tick terminated workers");
                    }
                }
            }
        }
        info!("Process reaper stopped");
    }

    /// Stop accepting jobs, terminate everything tracked, wait up to `grace`
    /// for exit, then kill survivors. Safe to call more than once.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        let handles: Vec<WorkerHandle> = {
            let jobs = self.jobs.lock();
            self.accepting.store(false, Ordering::SeqCst);
            jobs.values().map(|job| job.handle).collect()
        };

        if handles.is_empty() {
            self.jobs.lock().clear();
            return DrainReport::default();
        }

        info!(count = handles.len(), grace_secs = grace.as_secs_f64(), "Draining workers");
        for handle in &handles {
            handle.terminate();
        }

        let deadline = Instant::now() + grace;
        let mut survivors: Vec<WorkerHandle> = handles.clone();
        while !survivors.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
            survivors.retain(|handle| handle.is_alive());
        }

        for handle in &survivors {
            handle.kill();
            error!(pid = handle.pid(), "Worker ignored termination, killed");
        }
        self.forced_kills.fetch_add(survivors.len() as u64, Ordering::Relaxed);
        self.jobs.lock().clear();

        let report = DrainReport {
            terminated: handles.len() - survivors.len(),
            killed: survivors.len(),
        };
        info!(terminated = report.terminated, killed = report.killed, "Drain complete");
        report
    }

    /// Kill every tracked job without waiting.
    pub fn kill_all(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let jobs: Vec<JobRecord> = self.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in &jobs {
            job.handle.kill();
        }
        self.forced_kills.fetch_add(jobs.len() as u64, Ordering::Relaxed);
        jobs.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let now = Instant::now();
        let jobs: Vec<JobInfo> = self.jobs.lock().values().map(|job| job.info(now)).collect();
        RegistryStats {
            accepting: self.is_accepting(),
            active_jobs: jobs.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            forced_kills: self.forced_kills.load(Ordering::Relaxed),
            jobs,
        }
    }
}
