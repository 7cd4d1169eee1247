// Synthesis gateway - composes cache, admission, supervision and recovery

use crate::admission::{AdmissionController, AdmissionGuard};
use crate::cache::{CacheConfig, ResultCache};
use crate::config::AppConfig;
use crate::error::{ErrorCode, Result, SynthError};
use crate::gateway::maintenance::Background;
use crate::gateway::models::{GatewayMetrics, Synthesis, SynthesisRequest};
use crate::metrics;
use crate::monitor::{ResourceMonitor, ResourceStatus, SysinfoProbe, SystemProbe};
use crate::process::{self, DrainReport, JobSpec, ProcessRegistry, WorkerCommand, WorkerOutput};
use crate::recovery::{ErrorContext, ErrorHandler, Recovery};
use crate::utils::logging::preview;
use crate::utils::retry;
use bytes::Bytes;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input length the base execution timeout is sized for.
const TIMEOUT_SCALE_CHARS: f64 = 500.0;
const MAX_LENGTH_FACTOR: f64 = 3.0;

/// Upper bound on the graceful part of a shutdown drain.
const MAX_DRAIN_GRACE: Duration = Duration::from_secs(20);

/// Characters of request text shown in log lines.
const LOG_PREVIEW_CHARS: usize = 48;

/// Seconds an overloaded gateway asks callers to wait.
const OVERLOAD_RETRY_AFTER_SECS: u64 = 5;

/// The serving core, built once and shared behind an `Arc`.
pub struct SynthesisGateway {
    pub(crate) config: AppConfig,
    pub(crate) monitor: Arc<ResourceMonitor>,
    pub(crate) cache: Arc<ResultCache>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) registry: Arc<ProcessRegistry>,
    pub(crate) errors: Arc<ErrorHandler>,
    worker: WorkerCommand,
    pub(crate) background: Mutex<Option<Background>>,
}

/// Result of one pass through cache, admission and worker.
struct JobOutcome {
    audio: Bytes,
    cache_hit: bool,
}

impl SynthesisGateway {
    /// Build the gateway with live host readings.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let probe = SysinfoProbe::new(&config.monitor.disk_path);
        Self::with_probe(config, Box::new(probe))
    }

    /// Build the gateway with a custom source of host readings.
    pub fn with_probe(config: &AppConfig, probe: Box<dyn SystemProbe>) -> Result<Self> {
        config.validate()?;

        let monitor = Arc::new(ResourceMonitor::new(probe));
        let cache = Arc::new(ResultCache::new(CacheConfig::from(&config.cache)));
        let admission = Arc::new(AdmissionController::new(
            &config.admission,
            Arc::clone(&monitor),
        ));
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(
            config.monitor.reaper_interval_ms,
        )));
        let errors = Arc::new(ErrorHandler::with_default_strategies(
            config.errors.history_capacity,
            config.worker.default_model.as_str(),
        ));

        let worker = WorkerCommand {
            program: config.worker.command.clone(),
            args: config.worker.args.clone(),
            niceness: config.worker.niceness,
        };

        info!(
            command = %worker.program,
            model_dir = %config.worker.model_dir,
            default_model = %config.worker.default_model,
            "Synthesis gateway initialized"
        );

        Ok(Self {
            config: config.clone(),
            monitor,
            cache,
            admission,
            registry,
            errors,
            worker,
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn cache_lookup(&self, text: &str, model: &str, voice: &str) -> Option<Bytes> {
        self.cache.lookup(text, model, voice)
    }

    pub fn cache_store(&self, text: &str, model: &str, voice: &str, audio: Bytes) -> bool {
        self.cache.store(text, model, voice, audio)
    }

    /// Ask for a job slot, waiting at most `timeout_hint` (scaled to load).
    ///
    /// On an exhausted host, workers far past their timeout are killed first.
    /// If none were, the request is shed with `SYSTEM_OVERLOAD` without waiting.
    pub async fn acquire(
        &self,
        correlation_id: &str,
        timeout_hint: Option<Duration>,
    ) -> Result<AdmissionGuard> {
        let base = timeout_hint
            .unwrap_or_else(|| Duration::from_secs(self.config.admission.default_timeout_secs));
        let snapshot = self.admission.snapshot();

        if snapshot.status() == ResourceStatus::Exhausted {
            let freed = self.registry.escalate();
            if freed == 0 {
                metrics::record_admission("overload");
                warn!(
                    correlation_id,
                    cpu = snapshot.cpu_percent,
                    memory = snapshot.memory_percent,
                    disk = snapshot.disk_percent,
                    "System overloaded, request shed"
                );
                return Err(SynthError::new(
                    ErrorCode::SystemOverload,
                    "System overloaded, try again later",
                )
                .with_detail("cpu_percent", snapshot.cpu_percent)
                .with_detail("memory_percent", snapshot.memory_percent)
                .with_detail("disk_percent", snapshot.disk_percent)
                .with_detail("retry_after", OVERLOAD_RETRY_AFTER_SECS)
                .with_correlation_id(correlation_id));
            }
            info!(correlation_id, freed, "Freed overdue workers before admission");
        }

        self.admission
            .acquire_under(correlation_id, base, &snapshot)
            .await
    }

    pub fn release(&self, guard: AdmissionGuard) {
        self.admission.release(guard);
    }

    /// Run the configured worker with extra `args`, under the registry's supervision.
    pub async fn spawn_and_run(&self, args: &[String], job: JobSpec) -> Result<WorkerOutput> {
        let command = self.worker.clone().args(args.iter().cloned());
        process::spawn_and_run(&self.registry, &command, job).await
    }

    /// Read-only view of every component's statistics.
    pub fn metrics(&self) -> GatewayMetrics {
        let snapshot = self.admission.snapshot();
        GatewayMetrics {
            status: snapshot.status(),
            snapshot,
            uptime_secs: self.monitor.uptime().as_secs_f64(),
            latency: self.monitor.latency_stats(),
            memory_history: self.monitor.memory_history(),
            admission: self.admission.stats(),
            cache: self.cache.stats(),
            processes: self.registry.stats(),
            errors: self.errors.stats(),
        }
    }

    /// Run one request with up to `attempts` tries, honouring `retry_after` hints.
    ///
    /// Starts background maintenance so overrunning workers are reaped.
    /// The caller stops it again through [`shutdown`](Self::shutdown).
    pub async fn synthesize_with_retry(
        self: &Arc<Self>,
        request: SynthesisRequest,
        attempts: u32,
    ) -> Result<Synthesis> {
        self.start_background();

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let request = request.correlation_id(correlation_id);

        retry::with_retry("synthesize", attempts.max(1), |attempt| {
            let request = request.clone().retry_count(attempt - 1);
            let gateway = Arc::clone(self);
            async move { gateway.synthesize(request).await }
        })
        .await
    }

    /// Run one request end to end, applying at most one degraded replay.
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<Synthesis> {
        let correlation_id = request
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let model = request
            .model
            .unwrap_or_else(|| self.config.worker.default_model.clone());
        let voice = request
            .voice
            .unwrap_or_else(|| self.config.worker.default_voice.clone());
        let text = request.text;
        let job_id = job_id(&correlation_id, request.retry_count);

        let context = ErrorContext::new()
            .with_correlation_id(correlation_id.as_str())
            .with_endpoint("synthesize")
            .with_model(model.as_str())
            .with_text(text.as_str())
            .with_retry_count(request.retry_count);

        if let Err(error) = self.validate(&text, &model, &voice) {
            let error = error.with_correlation_id(correlation_id.as_str());
            self.errors.record(&error, &context);
            return Err(error);
        }

        info!(
            correlation_id = %correlation_id,
            model = %model,
            voice = %voice,
            text = %preview(&text, LOG_PREVIEW_CHARS),
            "Synthesis requested"
        );

        let error = match self
            .run_job(&correlation_id, &job_id, &text, &model, &voice)
            .await
        {
            Ok(outcome) => {
                return Ok(Synthesis {
                    audio: outcome.audio,
                    cache_hit: outcome.cache_hit,
                    model,
                    voice,
                    correlation_id,
                    degraded: None,
                })
            }
            Err(error) => error.with_correlation_id(correlation_id.as_str()),
        };

        let resolution = self.errors.handle_with_recovery(error, &context)?;
        let (replay_model, replay_text, message) = match resolution.recovery {
            Recovery::FallbackModel { model: fallback, message } => (fallback, text, message),
            Recovery::TruncateText { text: shortened, message } => (model, shortened, message),
            Recovery::RetryAfter { delay_secs, .. } => {
                return Err(resolution.error.with_detail("retry_after", delay_secs));
            }
        };

        let replay_id = format!("{}-replay", job_id);
        warn!(
            correlation_id = %correlation_id,
            job_id = %replay_id,
            model = %replay_model,
            reason = %message,
            "Replaying synthesis in degraded mode"
        );
        match self
            .run_job(&correlation_id, &replay_id, &replay_text, &replay_model, &voice)
            .await
        {
            Ok(outcome) => Ok(Synthesis {
                audio: outcome.audio,
                cache_hit: outcome.cache_hit,
                model: replay_model,
                voice,
                correlation_id,
                degraded: Some(message),
            }),
            Err(error) => {
                let error = error
                    .with_correlation_id(correlation_id.as_str())
                    .with_detail("degraded_from", resolution.error.code.as_str());
                self.errors.record(&error, &context);
                Err(error)
            }
        }
    }

    fn validate(&self, text: &str, model: &str, voice: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SynthError::new(ErrorCode::InvalidText, "Text must not be empty"));
        }
        let length = text.chars().count();
        let max = self.config.worker.max_text_length;
        if length > max {
            return Err(SynthError::new(
                ErrorCode::TextTooLong,
                format!("Text is {} characters, the limit is {}", length, max),
            )
            .with_detail("length", length)
            .with_detail("max_length", max));
        }
        if !is_safe_name(model) {
            return Err(
                SynthError::new(ErrorCode::InvalidModelName, "Model name contains invalid characters")
                    .with_detail("model", model),
            );
        }
        if !is_safe_name(voice) {
            return Err(
                SynthError::new(ErrorCode::InvalidSpeakerId, "Speaker id contains invalid characters")
                    .with_detail("voice", voice),
            );
        }
        Ok(())
    }

    async fn resolve_model(&self, model: &str) -> Result<PathBuf> {
        if !is_safe_name(model) {
            return Err(
                SynthError::new(ErrorCode::InvalidModelName, "Model name contains invalid characters")
                    .with_detail("model", model),
            );
        }
        let path = PathBuf::from(&self.config.worker.model_dir).join(format!("{}.onnx", model));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(
                SynthError::new(ErrorCode::ModelNotFound, format!("Model {} not found", model))
                    .with_detail("model", model)
                    .with_detail("path", path.display().to_string()),
            ),
        }
    }

    /// `job_id` names the worker in the registry; it differs from the
    /// request's correlation id on retries and replays.
    async fn run_job(
        &self,
        correlation_id: &str,
        job_id: &str,
        text: &str,
        model: &str,
        voice: &str,
    ) -> Result<JobOutcome> {
        let started = Instant::now();
        if let Some(audio) = self.cache_lookup(text, model, voice) {
            metrics::record_synthesis(model, true, started.elapsed().as_secs_f64());
            return Ok(JobOutcome {
                audio,
                cache_hit: true,
            });
        }

        let model_path = self.resolve_model(model).await?;
        let guard = self.acquire(correlation_id, None).await?;

        let status = self
            .monitor
            .last_snapshot()
            .map_or(ResourceStatus::Available, |snapshot| snapshot.status());
        let (start_timeout, exec_timeout) = self.job_timeouts(text, status);
        debug!(
            correlation_id,
            job_id,
            status = %status,
            exec_timeout_secs = exec_timeout.as_secs_f64(),
            "Running worker"
        );

        let args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "--speaker".to_string(),
            voice.to_string(),
        ];
        let job = JobSpec {
            correlation_id: job_id.to_string(),
            model: model.to_string(),
            stdin: Bytes::copy_from_slice(text.as_bytes()),
            start_timeout,
            exec_timeout,
        };

        let result = self
            .spawn_and_run(&args, job)
            .await
            .and_then(|output| output.into_audio(job_id));

        match result {
            Ok(audio) => {
                let elapsed = started.elapsed();
                self.monitor.record_latency(elapsed);
                metrics::record_worker_outcome("success");
                metrics::record_synthesis(model, false, elapsed.as_secs_f64());
                self.cache_store(text, model, voice, audio.clone());
                self.release(guard);
                info!(
                    correlation_id,
                    job_id,
                    bytes = audio.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Synthesis completed"
                );
                Ok(JobOutcome {
                    audio,
                    cache_hit: false,
                })
            }
            Err(error) => {
                self.admission.record_failure();
                if error.code != ErrorCode::TtsTimeout {
                    metrics::record_worker_outcome("failed");
                }
                self.release(guard);
                Err(error)
            }
        }
    }

    /// Start and execution timeouts for `text` under `status`.
    pub fn job_timeouts(&self, text: &str, status: ResourceStatus) -> (Duration, Duration) {
        let load = match status {
            ResourceStatus::Available => 1.0,
            ResourceStatus::Limited => 1.5,
            ResourceStatus::Exhausted => 2.0,
        };
        let length = (text.chars().count() as f64 / TIMEOUT_SCALE_CHARS).clamp(1.0, MAX_LENGTH_FACTOR);

        let start = Duration::from_secs(self.config.worker.start_timeout_secs).mul_f64(load);
        let exec = Duration::from_secs(self.config.worker.exec_timeout_secs).mul_f64(length * load);
        (start, exec)
    }

    /// Stop admitting, stop background loops and drain workers, all within `deadline`.
    /// Safe to call more than once.
    pub async fn shutdown(&self, deadline: Duration) -> DrainReport {
        info!(deadline_secs = deadline.as_secs_f64(), "Synthesis gateway shutting down");
        let started = Instant::now();
        self.admission.close();
        self.stop_background().await;

        let remaining = deadline.saturating_sub(started.elapsed());
        let grace = remaining.mul_f64(0.7).min(MAX_DRAIN_GRACE);
        match tokio::time::timeout(remaining, self.registry.drain(grace)).await {
            Ok(report) => report,
            Err(_) => {
                let killed = self.registry.kill_all();
                warn!(killed, "Shutdown deadline reached, killed remaining workers");
                DrainReport {
                    terminated: 0,
                    killed,
                }
            }
        }
    }
}

lazy_static! {
    /// Model and speaker names end up in paths and worker arguments.
    static ref SAFE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

fn is_safe_name(name: &str) -> bool {
    SAFE_NAME.is_match(name)
}

/// Registry key for one worker run of a request.
fn job_id(correlation_id: &str, retry_count: u32) -> String {
    match retry_count {
        0 => correlation_id.to_string(),
        n => format!("{}-r{}", correlation_id, n),
    }
}
