use anyhow::{Result, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber
///
/// `format` selects JSON lines (`json`) or multi-line human output (`pretty`).
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn setup_tracing(config: &LoggingConfig) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true);
    let registry = tracing_subscriber::registry().with(build_env_filter(config)?);

    match config.format.as_str() {
        "json" => registry.with(fmt_layer.json()).try_init()?,
        "pretty" => registry.with(fmt_layer.pretty()).try_init()?,
        other => bail!("Unsupported log format: {}. Use 'json' or 'pretty'", other),
    }

    Ok(())
}

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.level, e)),
    }
}
