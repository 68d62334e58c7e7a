pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod observability;
pub mod services;

pub use auth::{CacheStats, RuleCache, RuleCacheComponents, RuleCacheStats};
pub use config::*;
pub use error::*;
pub use services::rule_reader::{
    AccessInfo, AuthUser, FilterValue, RuleFilter, RuleReaderError, RuleReaderService,
    UserCredentials, UserRole,
};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

/// Bootstrap the rule cache for a host application
///
/// Loads the layered configuration, installs the tracing subscriber and the
/// optional Prometheus exporter, then builds the cache in front of `service`.
/// The cache configuration is re-read from `config_path` on every `init()`.
pub fn init_rule_cache(
    config_path: &Path,
    service: Arc<dyn RuleReaderService>,
) -> Result<RuleCacheComponents> {
    let app_config = config::load_config(Some(config_path))?;

    logging::setup_tracing(&app_config.logging)?;
    observability::install_prometheus_recorder(&app_config.metrics)?;

    tracing::info!(path = %config_path.display(), "Rule cache starting up");

    RuleCacheComponents::new_production(config_path, service)
}
