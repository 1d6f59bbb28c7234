//! Helpers to wrangle logging across OCMT crates
//! NOTE: [initialize_tracing] should only ever be called in tests or binaries;
//! a library should only concern itself with instrumentation and logging.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// The crates that are considered when constructing the default log filter
pub static OCMT_LOG_LEVEL_CRATES: &[&str] =
    &["ocmt_core", "ocmt_storage", "ocmt_api", "ocmt_relay", "tower_http"];

static INITIALIZE_TRACING: Once = Once::new();

/// Install the global tracing subscriber. The default filter enables `info`
/// for the OCMT crates; `RUST_LOG` overrides it entirely.
pub fn initialize_tracing(default_level: Option<&str>) {
    INITIALIZE_TRACING.call_once(|| {
        let level = default_level.unwrap_or("info");
        let directives = OCMT_LOG_LEVEL_CRATES
            .iter()
            .map(|name| format!("{name}={level}"))
            .collect::<Vec<String>>()
            .join(",");

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    });
}
