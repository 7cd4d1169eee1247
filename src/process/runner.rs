// Worker runner - spawn a synthesis worker, feed stdin, collect output

use crate::error::{ErrorCode, Result, SynthError};
use crate::process::handle::WorkerHandle;
use crate::process::registry::{JobRecord, ProcessRegistry};
use crate::utils::logging::preview;
use bytes::Bytes;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Extra time past the job timeout before the runner stops waiting on its own.
const REAPER_SLACK: Duration = Duration::from_secs(1);

/// How to launch a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Niceness increment for the worker (unix only, 0 leaves it unchanged).
    pub niceness: i32,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            niceness: 0,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a signal reaches the whole worker tree
        #[cfg(unix)]
        {
            let niceness = self.niceness;
            // SAFETY: setpgid and nice are async-signal-safe and do not allocate.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if niceness != 0 {
                        let _ = libc::nice(niceness);
                    }
                    Ok(())
                });
            }
        }

        cmd
    }
}

/// One job's spawn parameters.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub correlation_id: String,
    pub model: String,
    pub stdin: Bytes,
    pub start_timeout: Duration,
    pub exec_timeout: Duration,
}

/// Raw result of a finished worker.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub stdout: Bytes,
    pub stderr: String,
    /// `None` when the worker died from a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl WorkerOutput {
    /// Treat the output as synthesized audio, rejecting failed or empty runs.
    pub fn into_audio(self, correlation_id: &str) -> Result<Bytes> {
        if self.exit_code != Some(0) {
            return Err(SynthError::new(
                ErrorCode::TtsEngineFailed,
                format!(
                    "Worker exited with {}",
                    self.exit_code
                        .map_or_else(|| "a signal".to_string(), |code| format!("code {}", code))
                ),
            )
            .with_detail("exit_code", self.exit_code)
            .with_detail("stderr", preview(self.stderr.trim(), 500))
            .with_correlation_id(correlation_id));
        }

        if self.stdout.is_empty() {
            return Err(
                SynthError::new(ErrorCode::TtsEngineFailed, "Worker produced no output")
                    .with_detail("stderr", preview(self.stderr.trim(), 500))
                    .with_correlation_id(correlation_id),
            );
        }

        Ok(self.stdout)
    }
}

/// Unregisters the job when dropped before completion, killing the worker.
struct Registration<'a> {
    registry: &'a ProcessRegistry,
    correlation_id: &'a str,
    armed: bool,
}

impl Registration<'_> {
    /// `None` means the registry reaped the job first.
    fn complete(mut self) -> Option<JobRecord> {
        self.armed = false;
        self.registry.unregister(self.correlation_id)
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.force_terminate(self.correlation_id);
        }
    }
}

/// Spawn a worker, register it, write `stdin`, and wait for it to finish.
///
/// The registry's reaper enforces `exec_timeout`. A job it reaps comes back
/// as `TTS_TIMEOUT`.
pub async fn spawn_and_run(
    registry: &ProcessRegistry,
    command: &WorkerCommand,
    job: JobSpec,
) -> Result<WorkerOutput> {
    let correlation_id = job.correlation_id.as_str();
    let started = Instant::now();

    let mut child = spawn_with_timeout(command, job.start_timeout)
        .await
        .map_err(|e| e.with_correlation_id(correlation_id))?;

    let Some(pid) = child.id() else {
        return Err(SynthError::new(
            ErrorCode::TtsEngineFailed,
            "Worker exited before it could be tracked",
        )
        .with_correlation_id(correlation_id));
    };

    registry.register(JobRecord::new(
        correlation_id,
        job.exec_timeout,
        WorkerHandle::new(pid),
        job.model.as_str(),
        job.stdin.len(),
    ))?;
    let registration = Registration {
        registry,
        correlation_id,
        armed: true,
    };
    debug!(correlation_id, pid, program = %command.program, "Worker spawned");

    let stdin = child.stdin.take();
    let payload = job.stdin.clone();
    let writer = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let bound = job.exec_timeout + registry.reaper_interval() * 2 + REAPER_SLACK;
    let waited = tokio::time::timeout(bound, async {
        tokio::join!(writer, child.wait_with_output())
    })
    .await;

    let (written, output) = match waited {
        Ok(result) => result,
        Err(_) => {
            // Reaper never got to it; the registration guard kills the worker
            drop(registration);
            return Err(timeout_error(correlation_id, job.exec_timeout));
        }
    };

    if registration.complete().is_none() {
        return Err(timeout_error(correlation_id, job.exec_timeout));
    }

    if let Err(e) = written {
        // Workers may exit without reading all input
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            warn!(correlation_id, error = %e, "Failed writing worker stdin");
        }
    }

    let output = output.map_err(|e| SynthError::from(e).with_correlation_id(correlation_id))?;
    let duration = started.elapsed();
    debug!(
        correlation_id,
        exit_code = ?output.status.code(),
        stdout_bytes = output.stdout.len(),
        duration_ms = duration.as_millis() as u64,
        "Worker finished"
    );

    Ok(WorkerOutput {
        stdout: Bytes::from(output.stdout),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        duration,
    })
}

async fn spawn_with_timeout(command: &WorkerCommand, start_timeout: Duration) -> Result<Child> {
    let mut cmd = command.build();
    let spawning = tokio::task::spawn_blocking(move || cmd.spawn());

    match tokio::time::timeout(start_timeout, spawning).await {
        Ok(Ok(Ok(child))) => Ok(child),
        Ok(Ok(Err(e))) => {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::DependencyMissing
            } else {
                ErrorCode::TtsEngineFailed
            };
            Err(SynthError::new(code, format!("Failed to start worker: {}", e))
                .with_detail("command", command.program.as_str())
                .with_source(e))
        }
        Ok(Err(join_error)) => Err(SynthError::new(
            ErrorCode::TtsEngineFailed,
            format!("Worker spawn task failed: {}", join_error),
        )),
        Err(_) => Err(SynthError::new(
            ErrorCode::TtsTimeout,
            format!(
                "Worker did not start within {:.1}s",
                start_timeout.as_secs_f64()
            ),
        )
        .with_detail("phase", "start")
        .with_detail("timeout", start_timeout.as_secs_f64())),
    }
}

fn timeout_error(correlation_id: &str, timeout: Duration) -> SynthError {
    SynthError::new(
        ErrorCode::TtsTimeout,
        format!("Synthesis exceeded {:.1}s", timeout.as_secs_f64()),
    )
    .with_detail("phase", "exec")
    .with_detail("timeout", timeout.as_secs_f64())
    .with_correlation_id(correlation_id)
}
