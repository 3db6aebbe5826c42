//! Structured logging setup.
//!
//! Configures console logging with:
//! - `RUST_LOG`-driven filtering, falling back to the configured level
//! - Target, thread and source location on every line

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directives when neither `RUST_LOG` nor a level is given.
const DEFAULT_FILTER: &str = "info,price_throttler=debug";

/// Initialize tracing for the given service.
///
/// `log_level` is used as the filter when `RUST_LOG` is unset or invalid.
///
/// # Panics
///
/// Panics if tracing has already been initialized.
pub fn init_tracing(service_name: &str, log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    tracing::info!(service = service_name, "Tracing initialized");
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
