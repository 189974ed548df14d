//! Structured logging with `tracing`.
//!
//! Hub and client lifecycle is logged through `tracing` events with the
//! client id as a structured field. This module installs the process-wide
//! subscriber; [`test_utils`] captures events for assertions in tests.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with compact stderr output.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with one JSON object per line.
pub fn init_json_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
