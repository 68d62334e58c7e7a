//! Rule cache components for dependency injection
//!
//! Bundles the configuration manager and the [`RuleCache`] built on it so a
//! host application can create the whole stack in one call and share it.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::auth::rule_cache::{RuleCache, RuleCacheStats};
use crate::config::{
    CacheConfiguration, CacheConfigurationManager, FileConfigurationManager,
    StaticConfigurationManager,
};
use crate::services::rule_reader::{
    AccessInfo, AuthUser, FilterValue, RuleFilter, RuleReaderError, RuleReaderService, UserRole,
};

/// Bundle of the rule cache and its configuration source
#[derive(Clone)]
pub struct RuleCacheComponents {
    /// Source re-read by every `init()`
    pub config_manager: Arc<dyn CacheConfigurationManager>,
    /// Shared cache
    pub cache: Arc<RuleCache>,
}

impl RuleCacheComponents {
    /// Components whose cache configuration lives in a TOML file
    pub fn new_production(
        config_path: impl AsRef<Path>,
        service: Arc<dyn RuleReaderService>,
    ) -> Result<Self> {
        let config_manager: Arc<dyn CacheConfigurationManager> =
            Arc::new(FileConfigurationManager::new(config_path));
        Self::with_manager(config_manager, Some(service))
    }

    /// Components with a fixed in-memory configuration
    pub fn new_static(
        config: CacheConfiguration,
        service: Arc<dyn RuleReaderService>,
    ) -> Result<Self> {
        let config_manager: Arc<dyn CacheConfigurationManager> =
            Arc::new(StaticConfigurationManager::new(config));
        Self::with_manager(config_manager, Some(service))
    }

    /// Test components backed by [`MockRuleReaderService`]
    pub fn new_mock() -> Result<Self> {
        Self::new_static(
            CacheConfiguration::default(),
            Arc::new(MockRuleReaderService::new()),
        )
    }

    fn with_manager(
        config_manager: Arc<dyn CacheConfigurationManager>,
        service: Option<Arc<dyn RuleReaderService>>,
    ) -> Result<Self> {
        let cache = Arc::new(RuleCache::new(config_manager.clone(), service)?);
        Ok(Self {
            config_manager,
            cache,
        })
    }

    /// Get component statistics for monitoring
    pub async fn get_stats(&self) -> RuleCacheStats {
        self.cache.stats().await
    }
}

/// In-process rule reader for tests and demos
///
/// Grants everything except the `restricted` workspace, and knows a single
/// `admin`/`geoserver` account.
#[derive(Debug, Default)]
pub struct MockRuleReaderService;

impl MockRuleReaderService {
    pub fn new() -> Self {
        Self
    }

    fn decide(filter: &RuleFilter) -> AccessInfo {
        if filter.workspace == FilterValue::from("restricted") {
            AccessInfo::deny_all()
        } else {
            AccessInfo::allow_all()
        }
    }
}

#[async_trait]
impl RuleReaderService for MockRuleReaderService {
    async fn get_access_info(&self, filter: RuleFilter) -> Result<AccessInfo, RuleReaderError> {
        Ok(Self::decide(&filter))
    }

    async fn get_admin_authorization(
        &self,
        filter: RuleFilter,
    ) -> Result<AccessInfo, RuleReaderError> {
        let mut info = Self::decide(&filter);
        info.admin_rights = filter.user == FilterValue::from("admin");
        Ok(info)
    }

    async fn authorize(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthUser>, RuleReaderError> {
        if username == "admin" && password == "geoserver" {
            Ok(Some(AuthUser::new("admin", UserRole::Admin)))
        } else {
            Ok(None)
        }
    }
}
