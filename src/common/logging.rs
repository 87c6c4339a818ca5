//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them install a subscriber through [`init_logging`].

use tracing_subscriber::{fmt, EnvFilter};

use crate::common::{Error, Result};

/// Install a global `fmt` subscriber filtered by `filter`
/// (e.g. `"slabpool=debug"`).
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| Error::InvalidConfig(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| Error::InvalidConfig("logging already initialized".into()))
}
