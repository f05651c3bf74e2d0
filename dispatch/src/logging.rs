use tracing_subscriber::{fmt, EnvFilter};

/// Install a stdout `tracing` subscriber filtered by `RUST_LOG`
/// (default `info`). Does nothing if a subscriber is already set.
///
/// ```
/// dispatch::init_logging();
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
