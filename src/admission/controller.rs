// Adaptive admission controller - a resizable semaphore tuned from resource samples

use crate::config::AdmissionConfig;
use crate::error::{ErrorCode, Result, SynthError};
use crate::metrics;
use crate::monitor::{LoadCounts, ResourceMonitor, ResourceSnapshot, ResourceStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Latency below which a healthy system may grow its limit.
const GROW_LATENCY_SECS: f64 = 2.0;

/// Seconds a rejected caller is told to wait before retrying.
const TIMEOUT_RETRY_AFTER_SECS: u64 = 3;

struct LimitState {
    current: usize,
    /// Permits still to be withheld after a shrink that outran free slots.
    debt: usize,
    last_adjustment: Option<Instant>,
}

/// Snapshot of admission bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub current_limit: usize,
    pub initial_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub active: usize,
    pub waiting: usize,
    pub available: usize,
    pub total_admitted: u64,
    pub acquire_timeouts: u64,
    pub failed_jobs: u64,
    pub success_rate: f64,
}

/// Gates how many synthesis jobs run at once.
///
/// The ceiling moves between `min_limit` and `max_limit`. Growing adds
/// permits immediately. Shrinking only withholds permits as they come back,
/// so running jobs are never preempted.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    limits: Mutex<LimitState>,
    monitor: Arc<ResourceMonitor>,
    initial_limit: usize,
    min_limit: usize,
    max_limit: usize,
    adjust_interval: Duration,
    active: AtomicUsize,
    waiting: AtomicUsize,
    total_admitted: AtomicU64,
    acquire_timeouts: AtomicU64,
    failed_jobs: AtomicU64,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig, monitor: Arc<ResourceMonitor>) -> Self {
        let max_limit = config.effective_max_limit();
        let initial = config.max_concurrent.clamp(config.min_limit, max_limit);

        info!(
            initial,
            min = config.min_limit,
            max = max_limit,
            "Admission controller initialized"
        );
        metrics::update_admission_state(initial, 0, 0);

        Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            limits: Mutex::new(LimitState {
                current: initial,
                debt: 0,
                last_adjustment: None,
            }),
            monitor,
            initial_limit: initial,
            min_limit: config.min_limit,
            max_limit,
            adjust_interval: Duration::from_secs(config.adjust_interval_secs),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            total_admitted: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
        }
    }

    /// Wait for a slot, giving up after a timeout scaled to current load.
    pub async fn acquire(
        self: &Arc<Self>,
        correlation_id: &str,
        base_timeout: Duration,
    ) -> Result<AdmissionGuard> {
        let snapshot = self.snapshot();
        self.acquire_under(correlation_id, base_timeout, &snapshot).await
    }

    /// Like [`acquire`](Self::acquire), scaling the wait from a snapshot the caller already took.
    pub async fn acquire_under(
        self: &Arc<Self>,
        correlation_id: &str,
        base_timeout: Duration,
        snapshot: &ResourceSnapshot,
    ) -> Result<AdmissionGuard> {
        let status = snapshot.status();
        let timeout = effective_timeout(base_timeout, status);

        let ticket = WaitTicket::new(&self.waiting);
        debug!(
            correlation_id,
            status = %status,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for admission"
        );

        let acquired = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;
        drop(ticket);

        match acquired {
            Ok(Ok(permit)) => {
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.total_admitted.fetch_add(1, Ordering::Relaxed);
                metrics::record_admission("granted");
                self.publish_state();
                debug!(correlation_id, active, "Admission granted");

                Ok(AdmissionGuard {
                    permit: Some(permit),
                    controller: Arc::clone(self),
                    correlation_id: correlation_id.to_string(),
                    acquired_at: Instant::now(),
                })
            }
            Ok(Err(_)) => {
                metrics::record_admission("closed");
                Err(
                    SynthError::new(ErrorCode::ResourceExhausted, "Service is shutting down")
                        .with_correlation_id(correlation_id),
                )
            }
            Err(_) => {
                self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_admission("timeout");
                let active = self.active.load(Ordering::SeqCst);
                warn!(
                    correlation_id,
                    status = %status,
                    timeout_secs = timeout.as_secs_f64(),
                    active,
                    "Admission timed out"
                );

                Err(SynthError::new(
                    ErrorCode::ResourceExhausted,
                    format!(
                        "No synthesis slot available within {:.1}s",
                        timeout.as_secs_f64()
                    ),
                )
                .with_detail("timeout", timeout.as_secs_f64())
                .with_detail("original_timeout", base_timeout.as_secs_f64())
                .with_detail("active", active)
                .with_detail("status", status.to_string())
                .with_detail("retry_after", TIMEOUT_RETRY_AFTER_SECS)
                .with_correlation_id(correlation_id))
            }
        }
    }

    /// Return a slot. Equivalent to dropping the guard.
    pub fn release(&self, guard: AdmissionGuard) {
        debug_assert!(
            std::ptr::eq(Arc::as_ptr(&guard.controller), self),
            "guard released to a different controller"
        );
        drop(guard);
    }

    fn return_slot(&self, permit: OwnedSemaphorePermit, correlation_id: &str) {
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "admission slot released twice");

        {
            let mut limits = self.limits.lock();
            if limits.debt > 0 {
                limits.debt -= 1;
                permit.forget();
            } else {
                drop(permit);
            }
        }

        debug!(correlation_id, active = previous.saturating_sub(1), "Admission released");
        self.publish_state();
        self.maybe_adjust();
    }

    /// Re-tune from a fresh sample when the adjustment interval has passed.
    fn maybe_adjust(&self) {
        let due = match self.limits.lock().last_adjustment {
            Some(last) => last.elapsed() >= self.adjust_interval,
            None => true,
        };
        if due {
            let snapshot = self.snapshot();
            self.adjust(&snapshot);
        }
    }

    /// Resize the ceiling from a snapshot. Returns the new limit if it changed.
    ///
    /// Evaluates at most once per interval, whether or not the limit moves.
    pub fn adjust(&self, snapshot: &ResourceSnapshot) -> Option<usize> {
        let mut limits = self.limits.lock();
        let now = Instant::now();
        if let Some(last) = limits.last_adjustment {
            if now.saturating_duration_since(last) < self.adjust_interval {
                return None;
            }
        }

        let current = limits.current;
        let status = snapshot.status();
        let target = match status {
            ResourceStatus::Exhausted => (current * 7 / 10).max(self.min_limit),
            ResourceStatus::Limited => (current * 9 / 10).max(self.min_limit),
            ResourceStatus::Available if snapshot.avg_latency_secs < GROW_LATENCY_SECS => {
                (current * 11 / 10).max(current + 1).min(self.max_limit)
            }
            ResourceStatus::Available => current,
        };
        limits.last_adjustment = Some(now);
        if target == current {
            return None;
        }

        if target > current {
            let grow = target - current;
            let repaid = grow.min(limits.debt);
            limits.debt -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else {
            let shrink = current - target;
            let withheld = self.semaphore.forget_permits(shrink);
            limits.debt += shrink - withheld;
        }
        limits.current = target;
        drop(limits);

        info!(
            from = current,
            to = target,
            status = %status,
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            avg_latency_secs = snapshot.avg_latency_secs,
            "Admission limit adjusted"
        );
        self.publish_state();
        Some(target)
    }

    /// Sample resources with this controller's job counts.
    pub fn snapshot(&self) -> ResourceSnapshot {
        self.monitor.sample(LoadCounts {
            active: self.active.load(Ordering::SeqCst),
            max: self.initial_limit,
            queued: self.waiting.load(Ordering::SeqCst),
        })
    }

    /// Stop granting slots. Pending and future acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
        info!("Admission closed");
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn record_failure(&self) {
        self.failed_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_limit(&self) -> usize {
        self.limits.lock().current
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> AdmissionStats {
        let current_limit = self.current_limit();
        let total_admitted = self.total_admitted.load(Ordering::Relaxed);
        let failed_jobs = self.failed_jobs.load(Ordering::Relaxed);

        AdmissionStats {
            current_limit,
            initial_limit: self.initial_limit,
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            active: self.active(),
            waiting: self.waiting.load(Ordering::SeqCst),
            available: self.semaphore.available_permits(),
            total_admitted,
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            failed_jobs,
            success_rate: total_admitted.saturating_sub(failed_jobs) as f64
                / total_admitted.max(1) as f64,
        }
    }

    fn publish_state(&self) {
        metrics::update_admission_state(
            self.current_limit(),
            self.active(),
            self.waiting.load(Ordering::SeqCst),
        );
    }
}

/// Wait bound for a given base timeout under the current load.
pub fn effective_timeout(base: Duration, status: ResourceStatus) -> Duration {
    match status {
        ResourceStatus::Exhausted => base.mul_f64(0.5).max(Duration::from_secs(5)),
        ResourceStatus::Limited => base.mul_f64(0.8).max(Duration::from_secs(10)),
        ResourceStatus::Available => base,
    }
}

/// Permission to run one job. The slot is returned when dropped.
pub struct AdmissionGuard {
    permit: Option<OwnedSemaphorePermit>,
    controller: Arc<AdmissionController>,
    correlation_id: String,
    acquired_at: Instant,
}

impl AdmissionGuard {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl std::fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("correlation_id", &self.correlation_id)
            .field("held", &self.permit.is_some())
            .finish()
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.controller.return_slot(permit, &self.correlation_id);
        }
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct WaitTicket<'a>(&'a AtomicUsize);

impl<'a> WaitTicket<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StaticProbe;

    fn controller(max_concurrent: usize, interval_secs: u64) -> (Arc<AdmissionController>, StaticProbe) {
        let probe = StaticProbe::default();
        let monitor = Arc::new(ResourceMonitor::new(Box::new(probe.clone())));
        let config = AdmissionConfig {
            max_concurrent,
            min_limit: 1,
            max_limit: Some(max_concurrent * 2),
            default_timeout_secs: 30,
            adjust_interval_secs: interval_secs,
        };
        (Arc::new(AdmissionController::new(&config, monitor)), probe)
    }

    fn snapshot(memory_percent: f64, avg_latency_secs: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            memory_percent,
            avg_latency_secs,
            ..ResourceSnapshot::idle(10)
        }
    }

    #[test]
    fn test_effective_timeout_by_status() {
        let base = Duration::from_secs(30);
        assert_eq!(effective_timeout(base, ResourceStatus::Available), base);
        assert_eq!(effective_timeout(base, ResourceStatus::Limited), Duration::from_secs(24));
        assert_eq!(effective_timeout(base, ResourceStatus::Exhausted), Duration::from_secs(15));

        // Floors apply to short base timeouts
        let short = Duration::from_secs(4);
        assert_eq!(effective_timeout(short, ResourceStatus::Limited), Duration::from_secs(10));
        assert_eq!(effective_timeout(short, ResourceStatus::Exhausted), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_adjust_shrinks_and_grows() {
        let (controller, _) = controller(10, 0);

        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), Some(7));
        assert_eq!(controller.adjust(&snapshot(80.0, 0.0)), Some(6));
        assert_eq!(controller.adjust(&snapshot(10.0, 0.5)), Some(7));
        assert_eq!(controller.semaphore.available_permits(), 7);

        // Slow but healthy: unchanged
        assert_eq!(controller.adjust(&snapshot(10.0, 3.0)), None);
    }

    #[tokio::test]
    async fn test_adjust_respects_bounds() {
        let (controller, _) = controller(2, 0);
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), Some(1));
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), None);

        for _ in 0..10 {
            controller.adjust(&snapshot(10.0, 0.1));
        }
        assert_eq!(controller.current_limit(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_rate_limited() {
        let (controller, _) = controller(10, 30);
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), Some(7));
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), None);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), Some(4));
    }

    #[tokio::test]
    async fn test_soft_shrink_waits_for_releases() {
        let (controller, _) = controller(4, 3600);
        let mut guards = Vec::new();
        for i in 0..4 {
            guards.push(controller.acquire(&format!("job-{}", i), Duration::from_secs(1)).await.unwrap());
        }

        // 4 running, limit drops to 2: nobody is preempted
        assert_eq!(controller.adjust(&snapshot(96.0, 0.0)), Some(2));
        assert_eq!(controller.active(), 4);

        drop(guards.pop());
        drop(guards.pop());
        assert_eq!(controller.semaphore.available_permits(), 0);
        assert_eq!(controller.active(), 2);

        drop(guards.pop());
        assert!(controller.semaphore.available_permits() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_error_carries_details() {
        let (controller, _) = controller(1, 3600);
        let _held = controller.acquire("first", Duration::from_secs(1)).await.unwrap();

        let err = controller
            .acquire("second", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceExhausted);
        assert_eq!(err.correlation_id.as_deref(), Some("second"));
        assert!(err.details.contains_key("retry_after"));
        assert_eq!(controller.stats().acquire_timeouts, 1);
    }

    #[tokio::test]
    async fn test_closed_controller_rejects() {
        let (controller, _) = controller(2, 3600);
        controller.close();
        let err = controller.acquire("late", Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceExhausted);
        assert!(controller.is_closed());
    }
}
