use std::path::Path;

use anyhow::Result;
use figment::{Figment, providers::{Env, Format, Toml, Serialized}};
use garde::Validate;

use super::AppConfig;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "RULE_CACHE_";

/// Build the layered configuration source
///
/// 1. Embedded defaults (lowest priority)
/// 2. Optional TOML file
/// 3. Environment variables, `RULE_CACHE_CACHE__MAX_ENTRIES` style
pub fn config_figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()));

    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the application configuration
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config: AppConfig = config_figment(path).extract()?;

    // Validate with Garde
    config.validate()?;

    Ok(config)
}
