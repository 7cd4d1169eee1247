// Error taxonomy for the synthesis gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Stable error codes, grouped by the domain that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Model
    ModelNotFound,
    ModelInvalid,
    ModelLoadFailed,
    SpeakerNotFound,

    // Request
    InvalidText,
    TextTooLong,
    InvalidSpeakerId,
    InvalidModelName,

    // System
    ResourceExhausted,
    TtsEngineFailed,
    TtsTimeout,
    CacheError,
    SystemOverload,

    // Configuration
    ConfigInvalid,
    DependencyMissing,
    StartupFailed,
}

/// Domain an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Model,
    Request,
    System,
    Configuration,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 16] = [
        ErrorCode::ModelNotFound,
        ErrorCode::ModelInvalid,
        ErrorCode::ModelLoadFailed,
        ErrorCode::SpeakerNotFound,
        ErrorCode::InvalidText,
        ErrorCode::TextTooLong,
        ErrorCode::InvalidSpeakerId,
        ErrorCode::InvalidModelName,
        ErrorCode::ResourceExhausted,
        ErrorCode::TtsEngineFailed,
        ErrorCode::TtsTimeout,
        ErrorCode::CacheError,
        ErrorCode::SystemOverload,
        ErrorCode::ConfigInvalid,
        ErrorCode::DependencyMissing,
        ErrorCode::StartupFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorCode::ModelInvalid => "MODEL_INVALID",
            ErrorCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorCode::SpeakerNotFound => "SPEAKER_NOT_FOUND",
            ErrorCode::InvalidText => "INVALID_TEXT",
            ErrorCode::TextTooLong => "TEXT_TOO_LONG",
            ErrorCode::InvalidSpeakerId => "INVALID_SPEAKER_ID",
            ErrorCode::InvalidModelName => "INVALID_MODEL_NAME",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::TtsEngineFailed => "TTS_ENGINE_FAILED",
            ErrorCode::TtsTimeout => "TTS_TIMEOUT",
            ErrorCode::CacheError => "CACHE_ERROR",
            ErrorCode::SystemOverload => "SYSTEM_OVERLOAD",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::StartupFailed => "STARTUP_FAILED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::ModelNotFound
            | ErrorCode::ModelInvalid
            | ErrorCode::ModelLoadFailed
            | ErrorCode::SpeakerNotFound => ErrorCategory::Model,
            ErrorCode::InvalidText
            | ErrorCode::TextTooLong
            | ErrorCode::InvalidSpeakerId
            | ErrorCode::InvalidModelName => ErrorCategory::Request,
            ErrorCode::ResourceExhausted
            | ErrorCode::TtsEngineFailed
            | ErrorCode::TtsTimeout
            | ErrorCode::CacheError
            | ErrorCode::SystemOverload => ErrorCategory::System,
            ErrorCode::ConfigInvalid
            | ErrorCode::DependencyMissing
            | ErrorCode::StartupFailed => ErrorCategory::Configuration,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Model => "model",
            ErrorCategory::Request => "request",
            ErrorCategory::System => "system",
            ErrorCategory::Configuration => "configuration",
        }
    }
}

/// A typed failure leaving the core.
///
/// Carries a stable code, a human message, structured details and the
/// correlation id of the job that failed.
#[derive(Error, Debug)]
#[error("{code}: {message}")]
pub struct SynthError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Map<String, Value>,
    pub correlation_id: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SynthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
            correlation_id: None,
            source: None,
        }
    }

    /// Attach one structured detail, replacing any previous value for `key`.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Configuration and startup errors are never subject to recovery.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn config_invalid(key: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message).with_detail("config_key", key)
    }

    /// Serializable view used in API bodies and error records.
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            ErrorCode::ResourceExhausted | ErrorCode::SystemOverload => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::TtsTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => match self.category() {
                ErrorCategory::Model => StatusCode::NOT_FOUND,
                ErrorCategory::Request => StatusCode::BAD_REQUEST,
                ErrorCategory::System | ErrorCategory::Configuration => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

/// Structured error detail information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub details: Map<String, Value>,
    pub correlation_id: Option<String>,
}

impl From<std::io::Error> for SynthError {
    fn from(err: std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            ErrorCode::DependencyMissing
        } else {
            ErrorCode::TtsEngineFailed
        };
        SynthError::new(code, format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<config::ConfigError> for SynthError {
    fn from(err: config::ConfigError) -> Self {
        SynthError::new(ErrorCode::ConfigInvalid, format!("Config parsing error: {}", err))
            .with_source(err)
    }
}

// Convert SynthError to HTTP responses for Axum
impl IntoResponse for SynthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.code,
                "category": self.category().as_str(),
                "message": self.message,
                "details": self.details,
                "correlation_id": self.correlation_id,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;
