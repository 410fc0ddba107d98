//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The level comes from the `JARBOX_LOG` environment variable (any
//! `EnvFilter` directive, e.g. `debug` or `jarbox=trace`), defaulting to
//! `info`. Logs go to stderr so stdout stays free for the embedding
//! program.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "JARBOX_LOG";

/// Installs the global subscriber.
///
/// Returns `false` when a subscriber was already installed (by an earlier
/// call or by the embedding program), which is harmless.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
