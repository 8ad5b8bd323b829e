//! Logging bootstrap
//!
//! The store only emits `tracing` events; installing a subscriber is left to
//! the embedding program. [`init`] is a convenience for binaries, demos and
//! tests.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"mlmeta=debug"`) when the variable is unset or
/// invalid.
///
/// Returns `false` if a global subscriber was already installed, so repeated
/// calls are harmless.
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init("mlmeta=debug");
        assert!(!init("mlmeta=info"));
    }
}
