//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Resolve the filter: `RUST_LOG` first, then the configured directive

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber. `default_filter` applies when `RUST_LOG` is unset.
///
/// Calling this twice is harmless; the second install is ignored.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
