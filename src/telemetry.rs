//! Tracing bootstrap for embedders and tests.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber with the given default filter;
/// `RUST_LOG` wins when set. Safe to call more than once, later calls are
/// ignored.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
