//! Structured logging setup and log-safe text helpers.
//!
//! This module configures the `tracing` ecosystem for the application,
//! supporting multiple output formats, and provides a helper to keep
//! request text from flooding log lines.

use crate::config::LoggingConfig;
use crate::error::{ErrorCode, Result, SynthError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for the application.
///
/// Supports two output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `pretty` (default): Human-readable, colorized output for development.
///
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    // Configure filter from environment or config file
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    installed.map_err(|e| {
        SynthError::new(
            ErrorCode::StartupFailed,
            format!("Failed to install tracing subscriber: {}", e),
        )
    })
}

/// Shortens request text for log lines.
///
/// Keeps at most `max_chars` characters (never splitting a UTF-8 sequence)
/// and appends the number of characters left out.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let omitted = text[cut..].chars().count();
            format!("{}… (+{} chars)", &text[..cut], omitted)
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello", 5), "hello");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let output = preview("grüße aus köln", 4);
        assert!(output.starts_with("grüß"));
        assert!(output.ends_with("(+10 chars)"));
    }
}
