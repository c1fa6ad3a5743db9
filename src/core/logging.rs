//! Process-wide tracing setup.
//!
//! Diagnostics always go to stderr. In machine mode stdout carries exactly one
//! JSON line, so nothing else may ever be written there.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive (e.g. `phasegate=debug`).
pub const LOG_ENV: &str = "PHASEGATE_LOG";

pub fn init(machine_mode: bool) {
    let default_level = if machine_mode { "warn" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (e.g. from tests sharing a process) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
