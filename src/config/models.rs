use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::auth::clock::{SystemClock, TimeSource};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub cache: CacheConfiguration,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Tunables shared by the three rule cache maps
///
/// `expire_interval_ms` is expected to be at least `refresh_interval_ms`.
/// The ordering is not enforced: with the intervals inverted entries expire
/// before they ever become eligible for refresh-ahead.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CacheConfiguration {
    /// Maximum resident entries per map before LRU eviction
    #[garde(range(min = 1))]
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entry age at which a hit also triggers a background reload
    #[garde(skip)]
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Entry age at which the entry is dropped and reloaded synchronously
    #[garde(skip)]
    #[serde(default = "default_expire_interval")]
    pub expire_interval_ms: u64,

    /// Clock override, the system clock when unset
    #[garde(skip)]
    #[serde(skip)]
    pub time_source: Option<Arc<dyn TimeSource>>,
}

fn default_max_entries() -> usize {
    100
}

fn default_refresh_interval() -> u64 {
    15_000
}

fn default_expire_interval() -> u64 {
    30_000
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            refresh_interval_ms: default_refresh_interval(),
            expire_interval_ms: default_expire_interval(),
            time_source: None,
        }
    }
}

impl CacheConfiguration {
    pub fn new(max_entries: usize, refresh_interval_ms: u64, expire_interval_ms: u64) -> Self {
        Self {
            max_entries,
            refresh_interval_ms,
            expire_interval_ms,
            time_source: None,
        }
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn expire_interval(&self) -> Duration {
        Duration::from_millis(self.expire_interval_ms)
    }

    /// True when entries can expire before becoming eligible for refresh
    pub fn expires_before_refresh(&self) -> bool {
        self.expire_interval_ms < self.refresh_interval_ms
    }

    /// The configured clock, or a fresh system clock
    pub fn clock(&self) -> Arc<dyn TimeSource> {
        match &self.time_source {
            Some(source) => source.clone(),
            None => Arc::new(SystemClock::new()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    #[garde(skip)]
    #[serde(default)]
    pub enabled: bool,

    #[garde(range(min = 1024, max = 65535))]
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
