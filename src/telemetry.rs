//! Tracing initialization for binaries and tests embedding the crate.
//!
//! The crate itself only emits `tracing` events; hosts choose the
//! subscriber. [`init_telemetry`] wires up the standard stack: env-filtered
//! fmt output plus span traces on errors.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default subscriber: `RUST_LOG`-filtered fmt layer with ANSI
/// when the target is a terminal, plus an [`ErrorLayer`] so errors carry
/// span context.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(ErrorLayer::default())
        .try_init();
}
