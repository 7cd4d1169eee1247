// End-to-end tests of the synthesis gateway against shell workers

use std::sync::Arc;
use std::time::Duration;
use synthgate::config::AppConfig;
use synthgate::error::ErrorCode;
use synthgate::gateway::{SynthesisGateway, SynthesisRequest};
use synthgate::monitor::{StaticProbe, SystemReadings};
use tempfile::TempDir;

const DEFAULT_MODEL: &str = "en_GB-vctk-medium";

/// A model directory holding empty `.onnx` files for `models`.
fn model_dir(models: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for model in models {
        std::fs::write(dir.path().join(format!("{}.onnx", model)), b"").unwrap();
    }
    dir
}

/// Config whose worker runs `script` under `/bin/sh`.
fn config(dir: &TempDir, script: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.worker.command = "/bin/sh".to_string();
    config.worker.args = vec!["-c".to_string(), script.to_string(), "worker".to_string()];
    config.worker.model_dir = dir.path().display().to_string();
    config.worker.default_model = DEFAULT_MODEL.to_string();
    config.worker.niceness = 0;
    config.monitor.reaper_interval_ms = 100;
    config
}

fn gateway(config: &AppConfig) -> Arc<SynthesisGateway> {
    Arc::new(SynthesisGateway::with_probe(config, Box::new(StaticProbe::default())).unwrap())
}

fn gateway_at_memory(config: &AppConfig, memory_percent: f64) -> Arc<SynthesisGateway> {
    let probe = StaticProbe::new(SystemReadings {
        memory_percent,
        ..Default::default()
    });
    Arc::new(SynthesisGateway::with_probe(config, Box::new(probe)).unwrap())
}

async fn wait_for_worker(gateway: &SynthesisGateway) {
    for _ in 0..50 {
        if !gateway.registry().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_synthesize_then_cache_hit() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat"));

    let first = gateway
        .synthesize(SynthesisRequest::new("hello world"))
        .await
        .unwrap();
    assert_eq!(&first.audio[..], b"hello world");
    assert!(!first.cache_hit);
    assert_eq!(first.model, DEFAULT_MODEL);
    assert!(first.degraded.is_none());

    let second = gateway
        .synthesize(SynthesisRequest::new("hello world"))
        .await
        .unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.audio, first.audio);

    let metrics = gateway.metrics();
    assert_eq!(metrics.cache.hits, 1);
    assert_eq!(metrics.cache.stores, 1);
    assert_eq!(metrics.admission.total_admitted, 1);
    assert_eq!(metrics.admission.active, 0);
    assert_eq!(metrics.processes.active_jobs, 0);
    assert_eq!(metrics.latency.samples, 1);
}

#[tokio::test]
async fn test_worker_receives_model_and_speaker() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    // Echo the arguments the gateway appended instead of the text
    let gateway = gateway(&config(&dir, "cat >/dev/null; echo \"$@\""));

    let result = gateway
        .synthesize(SynthesisRequest::new("hi").voice("7"))
        .await
        .unwrap();
    let args = String::from_utf8(result.audio.to_vec()).unwrap();
    let expected_model = dir.path().join(format!("{}.onnx", DEFAULT_MODEL));
    assert_eq!(
        args.trim(),
        format!("-m {} --speaker 7", expected_model.display())
    );
}

#[tokio::test]
async fn test_missing_model_falls_back_to_default() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat"));

    let result = gateway
        .synthesize(SynthesisRequest::new("fallback please").model("de_DE-missing"))
        .await
        .unwrap();
    assert_eq!(result.model, DEFAULT_MODEL);
    assert!(result.degraded.unwrap().contains("de_DE-missing"));

    let errors = gateway.metrics().errors;
    assert_eq!(errors.errors_by_code[&ErrorCode::ModelNotFound], 1);
    assert_eq!(errors.recoveries, 1);
}

#[tokio::test]
async fn test_missing_default_model_is_not_replayed() {
    let dir = model_dir(&[]);
    let gateway = gateway(&config(&dir, "cat"));

    let error = gateway
        .synthesize(SynthesisRequest::new("nothing installed"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ModelNotFound);
    assert!(error.correlation_id.is_some());
}

#[tokio::test]
async fn test_validation_errors_are_recorded() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat"));

    let cases = [
        (SynthesisRequest::new(""), ErrorCode::InvalidText),
        (SynthesisRequest::new("x".repeat(501)), ErrorCode::TextTooLong),
        (
            SynthesisRequest::new("hi").model("../../etc/passwd"),
            ErrorCode::InvalidModelName,
        ),
        (SynthesisRequest::new("hi").voice("0 --x"), ErrorCode::InvalidSpeakerId),
    ];
    for (request, expected) in cases {
        let error = gateway.synthesize(request).await.unwrap_err();
        assert_eq!(error.code, expected);
    }

    let metrics = gateway.metrics();
    assert_eq!(metrics.errors.total_errors, 4);
    assert_eq!(metrics.admission.total_admitted, 0, "invalid input never takes a slot");
}

#[tokio::test]
async fn test_engine_failure_on_long_text_replays_truncated() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    // Fails for inputs longer than 100 bytes, echoes shorter ones
    let script = "input=$(cat); if [ ${#input} -gt 100 ]; then echo crash >&2; exit 3; fi; printf %s \"$input\"";
    let gateway = gateway(&config(&dir, script));

    let text = "a".repeat(150);
    let result = gateway
        .synthesize(SynthesisRequest::new(text.clone()))
        .await
        .unwrap();
    assert_eq!(result.audio.len(), 100);
    assert!(result.degraded.is_some());
    assert_eq!(gateway.metrics().errors.degradations, 1);
    assert_eq!(gateway.metrics().admission.failed_jobs, 1);
}

#[tokio::test]
async fn test_engine_failure_on_short_text_is_returned() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat >/dev/null; echo broken >&2; exit 3"));

    let error = gateway
        .synthesize(SynthesisRequest::new("short"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::TtsEngineFailed);
    assert_eq!(error.details["exit_code"], 3);
    assert_eq!(error.details["stderr"], "broken");
    assert_eq!(gateway.metrics().admission.active, 0);
}

#[tokio::test]
async fn test_missing_worker_binary() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let mut config = config(&dir, "cat");
    config.worker.command = "/nonexistent/synth-worker".to_string();
    let gateway = gateway(&config);

    let error = gateway
        .synthesize(SynthesisRequest::new("hello"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::DependencyMissing);
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat"));
    gateway.start_background();

    let report = gateway.shutdown(Duration::from_secs(2)).await;
    assert_eq!(report.terminated + report.killed, 0);
    assert!(!gateway.background_running());

    let error = gateway
        .synthesize(SynthesisRequest::new("too late"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceExhausted);

    // Idempotent
    gateway.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_shutdown_drains_running_worker() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat >/dev/null; sleep 30"));

    let running = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.synthesize(SynthesisRequest::new("slow")).await })
    };

    // Wait for the worker to be registered
    for _ in 0..50 {
        if !gateway.registry().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(gateway.registry().len(), 1);

    let report = gateway.shutdown(Duration::from_secs(3)).await;
    assert_eq!(report.terminated + report.killed, 1);

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_exhausted_host_sheds_request() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway_at_memory(&config(&dir, "cat"), 97.0);

    let error = gateway
        .synthesize(SynthesisRequest::new("hello"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::SystemOverload);
    assert_eq!(error.details["memory_percent"], 97.0);
    let retry_after = error.details["retry_after"].as_f64().unwrap();
    assert!((1.0..3.0).contains(&retry_after), "backoff at first try: {}", retry_after);

    // Out of degraded retries, the overload hint is passed through unchanged
    let error = gateway
        .synthesize(SynthesisRequest::new("hello").retry_count(3))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::SystemOverload);
    assert_eq!(error.details["retry_after"], 5);

    let metrics = gateway.metrics();
    assert_eq!(metrics.errors.errors_by_code[&ErrorCode::SystemOverload], 2);
    assert_eq!(metrics.admission.total_admitted, 0);
    assert_eq!(metrics.processes.total_registered, 0);
}

#[tokio::test(start_paused = true)]
async fn test_busy_slot_surfaces_retry_after() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let mut config = config(&dir, "cat");
    config.admission.max_concurrent = 1;
    config.admission.max_limit = Some(1);
    config.admission.default_timeout_secs = 1;
    let gateway = gateway(&config);

    let held = gateway.acquire("holder", None).await.unwrap();
    let error = gateway
        .synthesize(SynthesisRequest::new("queued"))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceExhausted);
    assert_eq!(error.details["retry_after"], 1.0);
    assert_eq!(gateway.metrics().admission.acquire_timeouts, 1);

    gateway.release(held);
    assert_eq!(gateway.metrics().admission.active, 0);
}

#[tokio::test]
async fn test_limited_host_extends_exec_timeout() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let mut config = config(&dir, "cat >/dev/null; sleep 30");
    config.worker.exec_timeout_secs = 1;
    let gateway = gateway_at_memory(&config, 80.0);
    gateway.start_background();

    let started = std::time::Instant::now();
    let error = gateway
        .synthesize(SynthesisRequest::new("slow"))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(error.code, ErrorCode::TtsTimeout);
    assert!(elapsed >= Duration::from_millis(1400), "reaped after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2500), "reaped after {:?}", elapsed);
    let processes = gateway.metrics().processes;
    assert_eq!(processes.timeouts, 1);
    assert_eq!(processes.forced_kills, 0);

    gateway.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_one_shot_synthesis_is_reaped() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let mut config = config(&dir, "cat >/dev/null; sleep 30");
    config.worker.exec_timeout_secs = 1;
    let gateway = gateway(&config);

    let started = std::time::Instant::now();
    let error = gateway
        .synthesize_with_retry(SynthesisRequest::new("slow"), 1)
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::TtsTimeout);
    assert!(started.elapsed() < Duration::from_millis(1900));
    assert!(gateway.background_running());
    let processes = gateway.metrics().processes;
    assert_eq!(processes.timeouts, 1);
    assert_eq!(processes.forced_kills, 0);

    gateway.shutdown(Duration::from_secs(2)).await;
    assert!(!gateway.background_running());
}

#[tokio::test]
async fn test_retried_request_gets_its_own_job_id() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    let gateway = gateway(&config(&dir, "cat >/dev/null; sleep 30"));

    let running = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let request = SynthesisRequest::new("again")
                .correlation_id("req-7")
                .retry_count(2);
            gateway.synthesize(request).await
        })
    };

    wait_for_worker(&gateway).await;
    assert!(gateway.registry().contains("req-7-r2"));
    assert!(!gateway.registry().contains("req-7"));

    gateway.shutdown(Duration::from_secs(2)).await;
    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.unwrap_err().correlation_id.as_deref(), Some("req-7"));
}

#[tokio::test]
async fn test_shutdown_stays_within_deadline() {
    let dir = model_dir(&[DEFAULT_MODEL]);
    // Ignores SIGTERM so the drain has to escalate
    let gateway = gateway(&config(&dir, "trap '' TERM; cat >/dev/null; sleep 30"));
    gateway.start_background();

    let running = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.synthesize(SynthesisRequest::new("stubborn")).await })
    };
    wait_for_worker(&gateway).await;
    assert_eq!(gateway.registry().len(), 1);

    let deadline = Duration::from_secs(1);
    let started = std::time::Instant::now();
    let report = gateway.shutdown(deadline).await;
    assert!(started.elapsed() < deadline + Duration::from_millis(500));
    assert_eq!(report.killed, 1);
    assert!(gateway.registry().is_empty());

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
}
