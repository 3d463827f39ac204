//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when set, so operators can raise
//! verbosity for one module (e.g. `RUST_LOG=auth_gateway::protocol=trace`)
//! without touching the config file.

use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber.
///
/// Calling it again (for example from several tests) leaves the first
/// subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    match installed {
        Ok(()) => debug!(app = %config.app_name, "Logging initialized"),
        Err(_) => debug!("Global subscriber already installed"),
    }
}
