//! Global `tracing` subscriber.

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber filtered by `level`. `RUST_LOG` wins when set.
///
/// Returns `false` when a subscriber was already installed, in which case
/// nothing changes.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_target(false)
        .try_init()
        .is_ok()
}
