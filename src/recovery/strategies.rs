// Recovery strategies and the generic degradation policy

use crate::error::{ErrorCategory, ErrorCode, SynthError};
use crate::recovery::models::{ErrorContext, Recovery};
use crate::utils::retry::jitter_secs;

/// Longest input kept when retrying after an engine failure.
pub const TRUNCATED_TEXT_CHARS: usize = 100;

/// Retries the degradation policy will suggest for overload.
pub const MAX_DEGRADED_RETRIES: u32 = 3;

/// Longest delay the exhaustion strategy will suggest, in seconds.
const MAX_EXHAUSTED_DELAY_SECS: u32 = 8;

/// A recovery registered for one error code.
pub trait RecoveryStrategy: Send + Sync {
    fn attempt(&self, error: &SynthError, context: &ErrorContext) -> Option<Recovery>;
}

impl<F> RecoveryStrategy for F
where
    F: Fn(&SynthError, &ErrorContext) -> Option<Recovery> + Send + Sync,
{
    fn attempt(&self, error: &SynthError, context: &ErrorContext) -> Option<Recovery> {
        self(error, context)
    }
}

/// Missing model: use the default one instead.
pub struct ModelNotFoundFallback {
    pub default_model: String,
}

impl RecoveryStrategy for ModelNotFoundFallback {
    fn attempt(&self, _error: &SynthError, context: &ErrorContext) -> Option<Recovery> {
        let requested = context.requested_model.as_deref()?;
        if requested == self.default_model {
            return None;
        }
        Some(Recovery::FallbackModel {
            model: self.default_model.clone(),
            message: format!(
                "Model {} not found, using default model {}",
                requested, self.default_model
            ),
        })
    }
}

/// Exhausted resources: suggest a linear backoff, giving up past eight seconds.
pub struct ResourceExhaustedBackoff;

impl RecoveryStrategy for ResourceExhaustedBackoff {
    fn attempt(&self, _error: &SynthError, context: &ErrorContext) -> Option<Recovery> {
        let delay = context.retry_count.checked_mul(2)?.checked_add(1)?;
        if delay > MAX_EXHAUSTED_DELAY_SECS {
            return None;
        }
        Some(Recovery::RetryAfter {
            delay_secs: f64::from(delay),
            retry_count: context.retry_count + 1,
            message: format!("Resources exhausted, retry after {}s", delay),
        })
    }
}

/// Fallback behaviour keyed by error category, tried when no registered
/// strategy produced a recovery.
pub struct DegradationPolicy {
    pub default_model: String,
}

impl DegradationPolicy {
    pub fn attempt(&self, error: &SynthError, context: &ErrorContext) -> Option<Recovery> {
        match (error.category(), error.code) {
            (ErrorCategory::Model, ErrorCode::ModelLoadFailed) => {
                if context.requested_model.as_deref() == Some(self.default_model.as_str()) {
                    return None;
                }
                Some(Recovery::FallbackModel {
                    model: self.default_model.clone(),
                    message: format!(
                        "Model failed to load, using default model {} instead",
                        self.default_model
                    ),
                })
            }
            (ErrorCategory::System, ErrorCode::SystemOverload | ErrorCode::ResourceExhausted) => {
                if context.retry_count >= MAX_DEGRADED_RETRIES {
                    return None;
                }
                let delay = 2f64.powi(context.retry_count as i32) + jitter_secs(2.0);
                Some(Recovery::RetryAfter {
                    delay_secs: delay,
                    retry_count: context.retry_count + 1,
                    message: format!("System busy, retry suggested after {:.1} seconds", delay),
                })
            }
            (ErrorCategory::System, ErrorCode::TtsEngineFailed) => {
                let text = context.text.as_deref()?;
                let cut = text.char_indices().nth(TRUNCATED_TEXT_CHARS)?.0;
                Some(Recovery::TruncateText {
                    text: text[..cut].to_string(),
                    message: "Using shortened text due to engine failure".to_string(),
                })
            }
            _ => None,
        }
    }
}
