// Error handler - records failures and resolves them through recovery strategies

use crate::error::{ErrorCategory, ErrorCode, SynthError};
use crate::metrics;
use crate::recovery::models::{ErrorContext, ErrorRecord, ErrorStats, Resolution};
use crate::recovery::strategies::{
    DegradationPolicy, ModelNotFoundFallback, RecoveryStrategy, ResourceExhaustedBackoff,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct ErrorLog {
    recent: VecDeque<ErrorRecord>,
    totals: BTreeMap<ErrorCode, u64>,
}

/// Central sink for job failures.
///
/// Every error handed to [`ErrorHandler::handle_with_recovery`] is recorded
/// before any recovery is attempted.
pub struct ErrorHandler {
    log: Mutex<ErrorLog>,
    capacity: usize,
    strategies: RwLock<HashMap<ErrorCode, Box<dyn RecoveryStrategy>>>,
    degradation: DegradationPolicy,
    recoveries: AtomicU64,
    degradations: AtomicU64,
}

impl ErrorHandler {
    /// A handler with no registered strategies.
    pub fn new(capacity: usize, default_model: impl Into<String>) -> Self {
        Self {
            log: Mutex::new(ErrorLog::default()),
            capacity: capacity.max(1),
            strategies: RwLock::new(HashMap::new()),
            degradation: DegradationPolicy {
                default_model: default_model.into(),
            },
            recoveries: AtomicU64::new(0),
            degradations: AtomicU64::new(0),
        }
    }

    /// A handler with the stock strategies for missing models and exhausted resources.
    pub fn with_default_strategies(capacity: usize, default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        let handler = Self::new(capacity, default_model.clone());
        handler.register_strategy(
            ErrorCode::ModelNotFound,
            ModelNotFoundFallback { default_model },
        );
        handler.register_strategy(ErrorCode::ResourceExhausted, ResourceExhaustedBackoff);
        handler
    }

    /// Register the strategy for `code`, replacing any previous one.
    pub fn register_strategy<S>(&self, code: ErrorCode, strategy: S)
    where
        S: RecoveryStrategy + 'static,
    {
        self.strategies.write().insert(code, Box::new(strategy));
    }

    /// Log and count an error without attempting recovery.
    pub fn record(&self, error: &SynthError, context: &ErrorContext) {
        log_error(error, context);
        metrics::record_error(error.code.as_str(), error.category().as_str());

        let mut log = self.log.lock();
        if log.recent.len() == self.capacity {
            log.recent.pop_front();
        }
        log.recent.push_back(ErrorRecord::new(error, context));
        *log.totals.entry(error.code).or_insert(0) += 1;
    }

    /// Record the error, then try a registered strategy, then the degradation
    /// policy. Hands the original error back when neither applies.
    pub fn handle_with_recovery(
        &self,
        error: SynthError,
        context: &ErrorContext,
    ) -> Result<Resolution, SynthError> {
        self.record(&error, context);

        if error.is_fatal() {
            return Err(error);
        }

        let strategic = self
            .strategies
            .read()
            .get(&error.code)
            .and_then(|strategy| strategy.attempt(&error, context));
        if let Some(recovery) = strategic {
            info!(
                code = %error.code,
                recovery = recovery.kind(),
                correlation_id = ?context.correlation_id,
                "Recovered from error: {}",
                recovery.message()
            );
            self.recoveries.fetch_add(1, Ordering::Relaxed);
            metrics::record_recovery(error.code.as_str(), recovery.kind());
            return Ok(Resolution {
                recovery,
                degraded: false,
                error,
            });
        }

        if let Some(recovery) = self.degradation.attempt(&error, context) {
            info!(
                code = %error.code,
                recovery = recovery.kind(),
                correlation_id = ?context.correlation_id,
                "Applied graceful degradation: {}",
                recovery.message()
            );
            self.degradations.fetch_add(1, Ordering::Relaxed);
            metrics::record_recovery(error.code.as_str(), recovery.kind());
            return Ok(Resolution {
                recovery,
                degraded: true,
                error,
            });
        }

        Err(error)
    }

    pub fn stats(&self) -> ErrorStats {
        let now = Instant::now();
        let log = self.log.lock();

        let within = |window: Duration| {
            log.recent
                .iter()
                .filter(|record| now.saturating_duration_since(record.occurred_at) < window)
                .count()
        };

        let mut recent_by_code = BTreeMap::new();
        for record in &log.recent {
            *recent_by_code.entry(record.code).or_insert(0) += 1;
        }

        ErrorStats {
            total_errors: log.totals.values().sum(),
            errors_by_code: log.totals.clone(),
            errors_last_minute: within(MINUTE),
            errors_last_hour: within(HOUR),
            recent_by_code,
            recent_errors: log.recent.len(),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            degradations: self.degradations.load(Ordering::Relaxed),
        }
    }

    /// Most recent errors, newest last.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let log = self.log.lock();
        let skip = log.recent.len().saturating_sub(limit);
        log.recent.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn log_error(error: &SynthError, context: &ErrorContext) {
    let correlation_id = error
        .correlation_id
        .as_deref()
        .or(context.correlation_id.as_deref());
    let source = error.source.as_ref().map(|source| source.to_string());

    let expected = matches!(
        error.code,
        ErrorCode::ModelNotFound
            | ErrorCode::SpeakerNotFound
            | ErrorCode::ResourceExhausted
            | ErrorCode::SystemOverload
    ) || error.category() == ErrorCategory::Request;

    if expected {
        warn!(
            code = %error.code,
            category = error.category().as_str(),
            correlation_id,
            endpoint = ?context.endpoint,
            details = %serde_json::Value::Object(error.details.clone()),
            "{}",
            error.message
        );
    } else {
        error!(
            code = %error.code,
            category = error.category().as_str(),
            correlation_id,
            endpoint = ?context.endpoint,
            details = %serde_json::Value::Object(error.details.clone()),
            source = ?source,
            "{}",
            error.message
        );
    }
}
