//! Tracing setup.
//!
//! The filter sits behind a reload layer so the level from the loaded
//! configuration can replace the bootstrap level. `RUST_LOG` wins over both.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Level used until the configuration is loaded.
pub const BOOTSTRAP_LOG_LEVEL: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing(level: &str) {
    let (filter, handle) = reload::Layer::new(filter_for(level));
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Replaces the active filter with `level`.
pub fn apply_logging_level(level: &str) -> Result<(), String> {
    let Some(handle) = FILTER_HANDLE.get() else {
        return Ok(());
    };
    handle
        .reload(filter_for(level))
        .map_err(|e| format!("failed to apply log level {level}: {e}"))
}
