//! Telemetry helpers for structured logging and tracing.
//!
//! The crate only emits `tracing` events: pool growth and teardown at
//! `debug`, per-slot and per-job traffic at `trace`, leaks at `warn` and
//! protocol violations at `error`. Installing a subscriber is left to the
//! application; these helpers cover binaries, tests and benches.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "prometheus_job_pool=warn";

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`]. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Like [`init_tracing`], with explicit filter directives such as
/// `"prometheus_job_pool=trace"`. Invalid directives are ignored.
pub fn init_tracing_with(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
