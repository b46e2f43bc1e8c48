use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
///
/// Keeps Guardian's own records at `info` and everyone else's at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "warn,guardian_core=info,guardian=info";

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs a global `tracing` subscriber writing to stderr.
///
/// Records emitted through the `log` crate by dependencies are bridged into
/// `tracing`. The filter comes from `RUST_LOG`, then `default_filter`, then
/// [`DEFAULT_LOG_FILTER`].
///
/// Only the first call does anything. Returns whether a subscriber is
/// installed; `false` means another one was already set by the host.
///
/// # Examples
/// ```rust
/// let installed = guardian_core::logger::init_tracing(Some("guardian_core=debug"));
/// assert_eq!(installed, guardian_core::logger::init_tracing(None));
/// ```
pub fn init_tracing(default_filter: Option<&str>) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(default_filter.unwrap_or(DEFAULT_LOG_FILTER))
        });
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true));

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("a tracing subscriber is already set, keeping it");
            return false;
        }
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("failed to bridge log records: {e}");
        }
        true
    })
}
