//! Configuration data structures for synthgate.
//!
//! This module defines the schema for the application settings: the
//! monitoring server, the external synthesis worker, admission control,
//! the result cache, background monitoring and shutdown behaviour.

use crate::cache::EvictionPolicy;
use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings for the health and metrics endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// External synthesis worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Concurrency limits and their adaptive tuning.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Result cache sizing and eviction.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Background monitor and reaper cadence.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Error history retention.
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Shutdown drain behaviour.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the built-in monitoring server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `5000`
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Settings for the external synthesis worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable to spawn for every job.
    /// Default: `piper`
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments placed before the per-job model/speaker arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Directory holding `<model>.onnx` files.
    /// Default: `models`
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    /// Model used when a request names none, and the fallback on load failure.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Speaker used when a request names none.
    #[serde(default = "default_voice")]
    pub default_voice: String,

    /// Seconds allowed for the worker process to start.
    /// Default: `30`
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Base seconds allowed for one synthesis run, scaled by input length and load.
    /// Default: `25`
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Longest accepted input text, in characters.
    /// Default: `500`
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Niceness increment applied to worker processes (unix only).
    /// Default: `10`
    #[serde(default = "default_niceness")]
    pub niceness: i32,
}

/// Settings for the adaptive admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Initial number of concurrent synthesis jobs.
    /// Default: `10`
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Lowest the adaptive limit may shrink to.
    /// Default: `1`
    #[serde(default = "default_min_limit")]
    pub min_limit: usize,

    /// Highest the adaptive limit may grow to. Defaults to twice `max_concurrent`.
    #[serde(default)]
    pub max_limit: Option<usize>,

    /// Base seconds a caller may wait for a slot.
    /// Default: `30`
    #[serde(default = "default_acquire_timeout")]
    pub default_timeout_secs: u64,

    /// Minimum seconds between two limit adjustments.
    /// Default: `30`
    #[serde(default = "default_adjust_interval")]
    pub adjust_interval_secs: u64,
}

/// Settings for the result cache, in configuration units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime in seconds.
    /// Default: `3600`
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Maximum number of entries.
    /// Default: `1000`
    #[serde(default = "default_cache_max_items")]
    pub max_items: usize,

    /// Maximum total payload size in MiB.
    /// Default: `500`
    #[serde(default = "default_cache_max_size_mb")]
    pub max_size_mb: u64,

    /// Largest single payload accepted, in MiB.
    /// Default: `10`
    #[serde(default = "default_cache_max_item_size_mb")]
    pub max_item_size_mb: u64,

    /// Victim selection: `lru`, `lfu`, `fifo` or `size`.
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Seconds between background cleanup sweeps.
    /// Default: `300`
    #[serde(default = "default_cache_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Whether the background cleanup sweep runs at all.
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
}

/// Settings for resource sampling and process supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Reaper tick in milliseconds.
    /// Default: `1000`
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_ms: u64,

    /// Seconds between memory pressure checks.
    /// Default: `60`
    #[serde(default = "default_memory_check_interval")]
    pub memory_check_interval_secs: u64,

    /// Filesystem whose usage feeds the disk reading.
    /// Default: `/`
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

/// Settings for error bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsConfig {
    /// Capacity of the recent-error ring buffer.
    /// Default: `100`
    #[serde(default = "default_error_history")]
    pub history_capacity: usize,
}

/// Settings for the shutdown drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Overall deadline in seconds for draining workers.
    /// Default: `30`
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl AdmissionConfig {
    pub fn effective_max_limit(&self) -> usize {
        self.max_limit.unwrap_or(self.max_concurrent * 2)
    }
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            model_dir: default_model_dir(),
            default_model: default_model(),
            default_voice: default_voice(),
            start_timeout_secs: default_start_timeout(),
            exec_timeout_secs: default_exec_timeout(),
            max_text_length: default_max_text_length(),
            niceness: default_niceness(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_limit: default_min_limit(),
            max_limit: None,
            default_timeout_secs: default_acquire_timeout(),
            adjust_interval_secs: default_adjust_interval(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_items: default_cache_max_items(),
            max_size_mb: default_cache_max_size_mb(),
            max_item_size_mb: default_cache_max_item_size_mb(),
            eviction_policy: EvictionPolicy::default(),
            cleanup_interval_secs: default_cache_cleanup_interval(),
            auto_cleanup: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reaper_interval_ms: default_reaper_interval(),
            memory_check_interval_secs: default_memory_check_interval(),
            disk_path: default_disk_path(),
        }
    }
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_error_history(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Helper functions for serde defaults
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_command() -> String {
    "piper".to_string()
}

fn default_model_dir() -> String {
    "models".to_string()
}

fn default_model() -> String {
    "en_GB-vctk-medium".to_string()
}

fn default_voice() -> String {
    "0".to_string()
}

fn default_start_timeout() -> u64 {
    30
}

fn default_exec_timeout() -> u64 {
    25
}

fn default_max_text_length() -> usize {
    500
}

fn default_niceness() -> i32 {
    10
}

fn default_max_concurrent() -> usize {
    10
}

fn default_min_limit() -> usize {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_adjust_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

fn default_cache_max_items() -> usize {
    1000
}

fn default_cache_max_size_mb() -> u64 {
    500
}

fn default_cache_max_item_size_mb() -> u64 {
    10
}

fn default_cache_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_reaper_interval() -> u64 {
    1000
}

fn default_memory_check_interval() -> u64 {
    60
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_error_history() -> usize {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
