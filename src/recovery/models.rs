//! Recovery outcomes, error records and error statistics.

use crate::error::{ErrorCode, SynthError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::time::Instant;

/// What the failing job was trying to do.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub correlation_id: Option<String>,
    /// Caller-facing operation, e.g. `synthesize`.
    pub endpoint: Option<String>,
    pub requested_model: Option<String>,
    pub text: Option<String>,
    pub retry_count: u32,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(endpoint) = &self.endpoint {
            map.insert("endpoint".into(), endpoint.clone().into());
        }
        if let Some(model) = &self.requested_model {
            map.insert("requested_model".into(), model.clone().into());
        }
        if let Some(text) = &self.text {
            map.insert("text_length".into(), text.chars().count().into());
        }
        map.insert("retry_count".into(), self.retry_count.into());
        map
    }
}

/// A replacement outcome proposed for a failed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recovery {
    /// Run again with another model.
    FallbackModel { model: String, message: String },
    /// Try again after a delay.
    RetryAfter {
        delay_secs: f64,
        retry_count: u32,
        message: String,
    },
    /// Run again with shorter input.
    TruncateText { text: String, message: String },
}

impl Recovery {
    pub fn kind(&self) -> &'static str {
        match self {
            Recovery::FallbackModel { .. } => "fallback_model",
            Recovery::RetryAfter { .. } => "retry_after",
            Recovery::TruncateText { .. } => "truncate_text",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Recovery::FallbackModel { message, .. }
            | Recovery::RetryAfter { message, .. }
            | Recovery::TruncateText { message, .. } => message,
        }
    }
}

/// The handler's answer to a recoverable failure.
#[derive(Debug)]
pub struct Resolution {
    pub recovery: Recovery,
    /// Whether this came from the generic degradation policy rather than a
    /// registered strategy.
    pub degraded: bool,
    /// The failure that was resolved.
    pub error: SynthError,
}

/// One entry of the recent-error ring.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    pub details: Map<String, Value>,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Map<String, Value>,
    #[serde(skip)]
    pub occurred_at: Instant,
}

impl ErrorRecord {
    pub fn new(error: &SynthError, context: &ErrorContext) -> Self {
        Self {
            code: error.code,
            message: error.message.clone(),
            details: error.details.clone(),
            correlation_id: error
                .correlation_id
                .clone()
                .or_else(|| context.correlation_id.clone()),
            timestamp: Utc::now(),
            context: context.to_map(),
            occurred_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    /// Cumulative counts, unaffected by ring trimming.
    pub errors_by_code: BTreeMap<ErrorCode, u64>,
    pub errors_last_minute: usize,
    pub errors_last_hour: usize,
    /// Counts within the ring buffer only.
    pub recent_by_code: BTreeMap<ErrorCode, usize>,
    pub recent_errors: usize,
    pub recoveries: u64,
    pub degradations: u64,
}
