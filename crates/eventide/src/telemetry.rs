//! Tracing subscriber setup.
//!
//! Logs go to stderr: stdout is reserved for the readiness sentinel the
//! client parses, and nothing else may be printed there before it.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber. `level` (from config) seeds the filter when
/// `RUST_LOG` is unset; idempotent so tests can call it freely.
pub fn init(level: Option<&str>) {
    let default_filter = level.unwrap_or("info,eventide=debug");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
