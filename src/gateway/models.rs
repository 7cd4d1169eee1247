//! Request, result and metrics types of the synthesis gateway.

use crate::admission::AdmissionStats;
use crate::cache::CacheStats;
use crate::monitor::{LatencyStats, MemoryPoint, ResourceSnapshot, ResourceStatus};
use crate::process::RegistryStats;
use crate::recovery::ErrorStats;
use bytes::Bytes;
use serde::Serialize;

/// One text-to-speech job as submitted by a caller.
#[derive(Debug, Clone, Default)]
pub struct SynthesisRequest {
    pub text: String,
    /// Defaults to the configured model.
    pub model: Option<String>,
    /// Defaults to the configured speaker.
    pub voice: Option<String>,
    /// Generated when absent.
    pub correlation_id: Option<String>,
    /// How many times the caller has already retried this request.
    pub retry_count: u32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Audio produced for a request.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: Bytes,
    pub cache_hit: bool,
    /// Model that actually produced the audio.
    pub model: String,
    pub voice: String,
    pub correlation_id: String,
    /// Set when the audio came from a degraded replay, with the reason.
    pub degraded: Option<String>,
}

/// Everything the health and metrics endpoints report.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMetrics {
    pub status: ResourceStatus,
    pub snapshot: ResourceSnapshot,
    pub uptime_secs: f64,
    pub latency: LatencyStats,
    pub memory_history: Vec<MemoryPoint>,
    pub admission: AdmissionStats,
    pub cache: CacheStats,
    pub processes: RegistryStats,
    pub errors: ErrorStats,
}
