//! Sources of the rule cache configuration
//!
//! The rule cache asks its manager for a fresh [`CacheConfiguration`] every
//! time it is (re)initialised, so a manager backed by a file picks up edits
//! on the next `init()`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use garde::Validate;
use tracing::debug;

use super::{CacheConfiguration, config_figment};
use crate::auth::clock::TimeSource;
use crate::error::CacheError;

/// Supplies the current cache configuration
pub trait CacheConfigurationManager: Send + Sync {
    fn cache_configuration(&self) -> Result<CacheConfiguration, CacheError>;
}

/// Holds a configuration in memory
///
/// The value can be replaced at runtime; the cache sees it on its next
/// `init()`.
#[derive(Debug, Default)]
pub struct StaticConfigurationManager {
    config: RwLock<CacheConfiguration>,
}

impl StaticConfigurationManager {
    pub fn new(config: CacheConfiguration) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn set(&self, config: CacheConfiguration) {
        match self.config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

impl CacheConfigurationManager for StaticConfigurationManager {
    fn cache_configuration(&self) -> Result<CacheConfiguration, CacheError> {
        let config = match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Ok(config)
    }
}

/// Reads the `[cache]` table of a TOML file on every request
///
/// Missing keys fall back to defaults and `RULE_CACHE_CACHE__*` environment
/// variables override the file.
#[derive(Debug)]
pub struct FileConfigurationManager {
    path: PathBuf,
    time_source: Option<Arc<dyn TimeSource>>,
}

impl FileConfigurationManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            time_source: None,
        }
    }

    /// Attach a clock to every configuration this manager produces
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheConfigurationManager for FileConfigurationManager {
    fn cache_configuration(&self) -> Result<CacheConfiguration, CacheError> {
        let mut config: CacheConfiguration =
            config_figment(Some(&self.path)).extract_inner("cache")?;

        config.validate()?;
        config.time_source = self.time_source.clone();

        debug!(
            path = %self.path.display(),
            max_entries = config.max_entries,
            refresh_ms = config.refresh_interval_ms,
            expire_ms = config.expire_interval_ms,
            "Loaded cache configuration"
        );

        Ok(config)
    }
}
