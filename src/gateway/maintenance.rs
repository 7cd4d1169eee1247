// Background maintenance - reaper, memory pressure and cache cleanup loops

use crate::gateway::service::SynthesisGateway;
use crate::monitor::models::MEMORY_CRITICAL_PCT;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a loop iteration panics.
const PANIC_BACKOFF: Duration = Duration::from_secs(5);

/// How long shutdown waits for a loop to notice cancellation.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Running maintenance tasks and the token that stops them.
pub struct Background {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// What one memory check did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureReport {
    pub memory_percent: f64,
    pub critical: bool,
    pub expired_entries: usize,
    pub killed_jobs: usize,
}

impl SynthesisGateway {
    /// Start the reaper and the periodic maintenance loops. A second call is a no-op.
    pub fn start_background(self: &Arc<Self>) {
        let mut slot = self.background.lock();
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let registry = Arc::clone(&self.registry);
        tasks.push((
            "reaper",
            tokio::spawn(registry.run_reaper(cancel.child_token())),
        ));

        let memory_interval = Duration::from_secs(self.config.monitor.memory_check_interval_secs);
        let gateway = Arc::clone(self);
        tasks.push((
            "memory",
            tokio::spawn(supervised_loop(
                "memory",
                memory_interval,
                cancel.child_token(),
                move || {
                    gateway.check_memory_pressure();
                },
            )),
        ));

        let cache = &self.config.cache;
        if cache.enabled && cache.auto_cleanup {
            let cleanup_interval = Duration::from_secs(cache.cleanup_interval_secs);
            let gateway = Arc::clone(self);
            tasks.push((
                "cache-cleanup",
                tokio::spawn(supervised_loop(
                    "cache-cleanup",
                    cleanup_interval,
                    cancel.child_token(),
                    move || {
                        let removed = gateway.cache.cleanup();
                        if removed > 0 {
                            debug!(removed, "Periodic cache cleanup");
                        }
                    },
                )),
            ));
        }

        info!(tasks = tasks.len(), "Background maintenance started");
        *slot = Some(Background { cancel, tasks });
    }

    /// Cancel the maintenance loops and wait briefly for them to exit.
    pub async fn stop_background(&self) {
        let taken = self.background.lock().take();
        let Some(background) = taken else {
            return;
        };
        background.cancel.cancel();

        for (name, task) in background.tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task ended abnormally"),
                Err(_) => {
                    abort.abort();
                    warn!(task = name, "Background task did not stop in time, aborted");
                }
            }
        }
    }

    pub fn background_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Sample memory, and above the critical mark purge expired cache
    /// entries and kill workers that are far past their timeout.
    pub fn check_memory_pressure(&self) -> PressureReport {
        let snapshot = self.admission.snapshot();
        self.monitor.record_memory(snapshot.memory_percent);

        let mut report = PressureReport {
            memory_percent: snapshot.memory_percent,
            critical: snapshot.memory_percent > MEMORY_CRITICAL_PCT,
            expired_entries: 0,
            killed_jobs: 0,
        };
        if report.critical {
            report.expired_entries = self.cache.cleanup();
            report.killed_jobs = self.registry.escalate();
            warn!(
                memory = snapshot.memory_percent,
                expired_entries = report.expired_entries,
                killed_jobs = report.killed_jobs,
                "Critical memory pressure"
            );
        }
        report
    }
}

/// Run `body` every `interval` until cancelled. A panicking iteration is
/// logged and followed by a pause instead of ending the loop.
fn supervised_loop<F>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut body: F,
) -> impl Future<Output = ()> + Send
where
    F: FnMut() + Send + 'static,
{
    async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = AssertUnwindSafe(async { body() }).catch_unwind().await;
            if outcome.is_err() {
                error!(task = name, "Background iteration panicked");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(PANIC_BACKOFF) => {}
                }
            }
        }
        debug!(task = name, "Background loop exited");
    }
}
