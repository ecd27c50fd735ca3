//! Tracing subscriber setup for binaries and tests.
//!
//! Library code only emits events; installing a subscriber is left to the
//! application, which may call [`init_tracing`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "lineage_track=info,warn";

/// Failure to install the global subscriber (usually: one is already set).
#[derive(Debug, thiserror::Error)]
#[error("Failed to init subscriber: {0}")]
pub struct TelemetryInitError(String);

/// Install a formatted subscriber filtered by `RUST_LOG`.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| TelemetryInitError(e.to_string()))?;

    tracing::debug!(default_filter = DEFAULT_FILTER, "tracing initialized");
    Ok(())
}
