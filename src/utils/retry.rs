// Retry logic honouring the gateway's retry_after hints

use crate::error::{ErrorCode, SynthError};
use backoff::{backoff::Backoff, ExponentialBackoff};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Longest delay a hint may impose.
const MAX_HINT_SECS: f64 = 60.0;

/// Read the `retry_after` hint (seconds) attached to an error's details.
/// Returns the delay capped at 60 seconds.
pub fn retry_after_hint(error: &SynthError) -> Option<Duration> {
    let seconds = match error.details.get("retry_after")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim_end_matches('s').parse().ok()?,
        _ => return None,
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(Duration::from_secs_f64(seconds.min(MAX_HINT_SECS)))
}

/// Uniform jitter in `[0, max_secs)`, drawn from the OS random source.
pub fn jitter_secs(max_secs: f64) -> f64 {
    let mut buf = [0u8; 8];
    if getrandom::getrandom(&mut buf).is_err() {
        return max_secs / 2.0;
    }
    // 53 random bits give a uniformly distributed f64 in [0, 1)
    let unit = (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64;
    unit * max_secs
}

/// Create exponential backoff configuration for retries
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(500), // Start at 500ms
        initial_interval: Duration::from_millis(500),
        randomization_factor: 0.3, // Add jitter
        multiplier: 2.0,           // Double each time
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(Duration::from_secs(120)),
        ..Default::default()
    }
}

/// Determine if an error code describes a transient condition
pub fn is_retryable(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::ResourceExhausted | ErrorCode::SystemOverload | ErrorCode::TtsTimeout
    )
}

/// Execute operation with retry logic
/// - Uses the error's retry_after hint if available
/// - Falls back to exponential backoff
/// - Gives up on non-transient errors or after `max_attempts`
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, SynthError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, SynthError>>,
{
    let mut backoff = create_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(error.code) || attempt >= max_attempts {
                    return Err(error);
                }

                let delay = match retry_after_hint(&error) {
                    Some(hint) => {
                        debug!(
                            "{} failed with {} (attempt {}), gateway suggests waiting {}ms",
                            operation_name,
                            error.code,
                            attempt,
                            hint.as_millis()
                        );
                        hint
                    }
                    None => {
                        let backoff_delay =
                            backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        debug!(
                            "{} failed with {} (attempt {}), retrying after {}ms",
                            operation_name,
                            error.code,
                            attempt,
                            backoff_delay.as_millis()
                        );
                        backoff_delay
                    }
                };

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_after_hint() {
        let error = SynthError::new(ErrorCode::SystemOverload, "busy").with_detail("retry_after", 2.5);
        assert_eq!(retry_after_hint(&error).unwrap().as_millis(), 2500);

        let text = SynthError::new(ErrorCode::SystemOverload, "busy").with_detail("retry_after", "40s");
        assert_eq!(retry_after_hint(&text).unwrap().as_secs(), 40);

        // Capped at 60s
        let huge = SynthError::new(ErrorCode::SystemOverload, "busy").with_detail("retry_after", 120);
        assert_eq!(retry_after_hint(&huge).unwrap().as_secs(), 60);

        let none = SynthError::new(ErrorCode::SystemOverload, "busy");
        assert!(retry_after_hint(&none).is_none());
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            let jitter = jitter_secs(2.0);
            assert!((0.0..2.0).contains(&jitter));
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(ErrorCode::ResourceExhausted));
        assert!(is_retryable(ErrorCode::SystemOverload));
        assert!(!is_retryable(ErrorCode::InvalidText));
        assert!(!is_retryable(ErrorCode::ConfigInvalid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_uses_hint_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", 3, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(SynthError::new(ErrorCode::ResourceExhausted, "full")
                        .with_detail("retry_after", 1))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_fatal() {
        let result: Result<(), _> = with_retry("test", 5, |_| async {
            Err(SynthError::new(ErrorCode::TextTooLong, "long"))
        })
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::TextTooLong);
    }
}
