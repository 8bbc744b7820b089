//! Tracing subscriber setup.
//!
//! `RUST_LOG`, when set, takes precedence over `[logging].filter`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. Calling it twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
