//! Caching front for the rule reader service
//!
//! [`RuleCache`] keeps three independent [`LoadingCache`] maps:
//!
//! - rule access: [`RuleFilter`] to [`AccessInfo`]
//! - admin authorization: [`RuleFilter`] to [`AccessInfo`]
//! - user authentication: [`UserCredentials`] to [`AuthUser`]
//!
//! All three share the configuration obtained from the
//! [`CacheConfigurationManager`] at construction and on every [`RuleCache::init`].
//! The backing service can be wired after construction; lookups made before
//! that fail with [`CacheError::ServiceNotConfigured`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::cache::{CacheLoader, CacheStats, LoadingCache};
use crate::config::{CacheConfiguration, CacheConfigurationManager};
use crate::error::CacheError;
use crate::services::rule_reader::{
    AccessInfo, AuthUser, RuleFilter, RuleReaderService, UserCredentials,
};

const RULES_CACHE: &str = "rules";
const ADMIN_CACHE: &str = "admin";
const USERS_CACHE: &str = "users";

type ServiceSlot = Arc<RwLock<Option<Arc<dyn RuleReaderService>>>>;

/// Current service, without holding the slot lock across the backend call
async fn current_service(slot: &ServiceSlot) -> Result<Arc<dyn RuleReaderService>, CacheError> {
    slot.read()
        .await
        .as_ref()
        .cloned()
        .ok_or(CacheError::ServiceNotConfigured)
}

struct AccessInfoLoader {
    service: ServiceSlot,
}

#[async_trait]
impl CacheLoader<RuleFilter, AccessInfo> for AccessInfoLoader {
    async fn load(&self, filter: &RuleFilter) -> Result<Option<AccessInfo>, CacheError> {
        let service = current_service(&self.service).await?;
        let info = service.get_access_info(filter.clone()).await?;
        Ok(Some(info))
    }
}

struct AdminAuthorizationLoader {
    service: ServiceSlot,
}

#[async_trait]
impl CacheLoader<RuleFilter, AccessInfo> for AdminAuthorizationLoader {
    async fn load(&self, filter: &RuleFilter) -> Result<Option<AccessInfo>, CacheError> {
        let service = current_service(&self.service).await?;
        let info = service.get_admin_authorization(filter.clone()).await?;
        Ok(Some(info))
    }
}

struct AuthUserLoader {
    service: ServiceSlot,
}

#[async_trait]
impl CacheLoader<UserCredentials, AuthUser> for AuthUserLoader {
    async fn load(&self, credentials: &UserCredentials) -> Result<Option<AuthUser>, CacheError> {
        let service = current_service(&self.service).await?;
        let user = service
            .authorize(&credentials.username, &credentials.password)
            .await?;
        Ok(user)
    }
}

/// One generation of maps, replaced as a whole by `init()`
struct CacheMaps {
    config: CacheConfiguration,
    rules: LoadingCache<RuleFilter, AccessInfo>,
    admin: LoadingCache<RuleFilter, AccessInfo>,
    users: LoadingCache<UserCredentials, AuthUser>,
}

impl CacheMaps {
    fn build(config: CacheConfiguration, service: &ServiceSlot) -> Self {
        let rules = LoadingCache::new(
            RULES_CACHE,
            &config,
            Arc::new(AccessInfoLoader {
                service: service.clone(),
            }),
        );
        let admin = LoadingCache::new(
            ADMIN_CACHE,
            &config,
            Arc::new(AdminAuthorizationLoader {
                service: service.clone(),
            }),
        );
        let users = LoadingCache::new(
            USERS_CACHE,
            &config,
            Arc::new(AuthUserLoader {
                service: service.clone(),
            }),
        );

        Self {
            config,
            rules,
            admin,
            users,
        }
    }
}

/// Statistics of the three maps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleCacheStats {
    pub rules: CacheStats,
    pub admin: CacheStats,
    pub users: CacheStats,
}

impl fmt::Display for RuleCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rules: {}", self.rules)?;
        writeln!(f, "admin: {}", self.admin)?;
        write!(f, "users: {}", self.users)
    }
}

/// Read-through, refresh-ahead cache of rule reader answers
pub struct RuleCache {
    config_manager: Arc<dyn CacheConfigurationManager>,
    service: ServiceSlot,
    maps: RwLock<Arc<CacheMaps>>,
}

impl fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCache").finish_non_exhaustive()
    }
}

impl RuleCache {
    /// Build the cache from the manager's current configuration
    ///
    /// `service` may be `None` and wired later with
    /// [`set_real_rule_reader_service`](Self::set_real_rule_reader_service).
    pub fn new(
        config_manager: Arc<dyn CacheConfigurationManager>,
        service: Option<Arc<dyn RuleReaderService>>,
    ) -> Result<Self, CacheError> {
        let service: ServiceSlot = Arc::new(RwLock::new(service));
        let maps = Self::build_maps(config_manager.as_ref(), &service)?;

        Ok(Self {
            config_manager,
            service,
            maps: RwLock::new(Arc::new(maps)),
        })
    }

    fn build_maps(
        config_manager: &dyn CacheConfigurationManager,
        service: &ServiceSlot,
    ) -> Result<CacheMaps, CacheError> {
        let config = config_manager.cache_configuration()?;
        config.validate()?;

        if config.expires_before_refresh() {
            warn!(
                refresh_ms = config.refresh_interval_ms,
                expire_ms = config.expire_interval_ms,
                "Cache expire interval is shorter than the refresh interval, entries will never be refreshed"
            );
        }

        info!(
            max_entries = config.max_entries,
            refresh_ms = config.refresh_interval_ms,
            expire_ms = config.expire_interval_ms,
            "Initialized rule cache"
        );

        Ok(CacheMaps::build(config, service))
    }

    /// Re-read the configuration and rebuild the maps
    ///
    /// Entries and statistics of the previous generation are discarded. On a
    /// configuration error the current maps stay in place.
    pub async fn init(&self) -> Result<(), CacheError> {
        let maps = Self::build_maps(self.config_manager.as_ref(), &self.service)?;
        *self.maps.write().await = Arc::new(maps);
        Ok(())
    }

    async fn maps(&self) -> Arc<CacheMaps> {
        self.maps.read().await.clone()
    }

    /// Wire the backing service, replacing any previous one
    ///
    /// Entries already cached are kept.
    pub async fn set_real_rule_reader_service(&self, service: Arc<dyn RuleReaderService>) {
        *self.service.write().await = Some(service);
        info!("Rule reader service configured");
    }

    /// Access rules matching `filter`
    pub async fn get_access_info(&self, filter: &RuleFilter) -> Result<AccessInfo, CacheError> {
        self.maps()
            .await
            .rules
            .get(filter)
            .await?
            .ok_or(CacheError::EmptyLoad(RULES_CACHE))
    }

    /// Administrative rights matching `filter`
    pub async fn get_admin_authorization(
        &self,
        filter: &RuleFilter,
    ) -> Result<AccessInfo, CacheError> {
        self.maps()
            .await
            .admin
            .get(filter)
            .await?
            .ok_or(CacheError::EmptyLoad(ADMIN_CACHE))
    }

    /// Authenticate a user, `Ok(None)` for invalid credentials
    ///
    /// Rejections are never cached, so a user can log in right after their
    /// password is fixed on the backend.
    pub async fn authorize(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthUser>, CacheError> {
        let credentials = UserCredentials::new(username, password);
        let user = self.maps().await.users.get(&credentials).await?;

        if user.is_none() {
            debug!(username = %username, "Credentials rejected by rule reader service");
        }

        Ok(user)
    }

    /// Clear the three maps, keeping configuration and statistics
    pub async fn invalidate_all(&self) {
        let maps = self.maps().await;
        maps.rules.invalidate_all().await;
        maps.admin.invalidate_all().await;
        maps.users.invalidate_all().await;
        info!("Invalidated all rule cache entries");
    }

    /// Drop the cached access rules for `filter`
    pub async fn invalidate_access_info(&self, filter: &RuleFilter) -> bool {
        let removed = self.maps().await.rules.invalidate(filter).await;
        debug!(filter = %filter, removed, "Invalidated access info");
        removed
    }

    /// Drop the cached admin rights for `filter`
    pub async fn invalidate_admin_authorization(&self, filter: &RuleFilter) -> bool {
        let removed = self.maps().await.admin.invalidate(filter).await;
        debug!(filter = %filter, removed, "Invalidated admin authorization");
        removed
    }

    /// Drop every cached login of `username`, returning how many were removed
    pub async fn invalidate_user(&self, username: &str) -> usize {
        let removed = self
            .maps()
            .await
            .users
            .invalidate_where(|credentials| credentials.username == username)
            .await;
        info!(username = %username, removed, "Invalidated cached user");
        removed
    }

    /// Configuration of the current generation of maps
    pub async fn cache_configuration(&self) -> CacheConfiguration {
        self.maps().await.config.clone()
    }

    pub async fn rule_stats(&self) -> CacheStats {
        self.maps().await.rules.stats().await
    }

    pub async fn admin_stats(&self) -> CacheStats {
        self.maps().await.admin.stats().await
    }

    pub async fn user_stats(&self) -> CacheStats {
        self.maps().await.users.stats().await
    }

    pub async fn stats(&self) -> RuleCacheStats {
        let maps = self.maps().await;
        RuleCacheStats {
            rules: maps.rules.stats().await,
            admin: maps.admin.stats().await,
            users: maps.users.stats().await,
        }
    }

    pub async fn rule_cache_size(&self) -> usize {
        self.maps().await.rules.size().await
    }

    pub async fn admin_cache_size(&self) -> usize {
        self.maps().await.admin.size().await
    }

    pub async fn user_cache_size(&self) -> usize {
        self.maps().await.users.size().await
    }

    pub async fn reset_stats(&self) {
        let maps = self.maps().await;
        maps.rules.reset_stats();
        maps.admin.reset_stats();
        maps.users.reset_stats();
    }
}
