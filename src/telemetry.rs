//! Tracing setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,fngate=debug,tower_http=debug";

/// Installs a structured fmt subscriber filtered by `RUST_LOG`.
///
/// Calling it again after a subscriber is installed has no effect.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // A second call finds the global subscriber already set.
    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
