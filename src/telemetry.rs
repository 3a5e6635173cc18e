//! Ambient logging setup: a single entry point wiring `tracing-subscriber`
//! for either human-readable or JSON output.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Installs the global `tracing` subscriber. Safe to call once per
/// process; subsequent calls are no-ops if a subscriber is already set.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}
