//! Utility functions and helpers for synthgate.
//!
//! This module provides cross-cutting concerns like structured logging
//! and retry logic with backoff.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and log-safe previews.
//! - `retry`: Retry helpers that respect `retry_after` hints.

pub mod logging;
pub mod retry;
