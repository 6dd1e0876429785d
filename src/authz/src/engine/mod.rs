//! Authorization manager
//!
//! Entry point of the engine: resolves raw references, applies the
//! deployment-wide shortcuts, answers from the security cache when it can
//! and loads the cache otherwise.
//!
//! # Architecture
//!
//! ```text
//! has_access ─→ ILLEGAL / stale right / superadmin / policy hooks
//!     │
//!     ├─→ SecurityCache ──hit──→ RightSet
//!     │        ↑ miss
//!     └─→ SecurityCacheLoader ─→ RuleSource, GroupMembership
//!              │
//!              └─→ AuthorizationSettler ─→ SecurityCache
//! ```

pub mod metrics;

pub use metrics::{AuthorizationMetrics, EngineMetrics};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use wikisec_core::{EntityReference, SecurityReference, SecurityReferenceFactory, UserSecurityReference};

use crate::bridge::{DeploymentPolicy, GroupMembership, RuleSource};
use crate::cache::{CacheConfig, SecurityCache};
use crate::config::AuthorizationConfig;
use crate::error::{AuthzError, Result};
use crate::invalidator::SecurityCacheRulesInvalidator;
use crate::loader::SecurityCacheLoader;
use crate::rights::{Right, RightDescription, RightRegistry, RightSet};
use crate::settler::{DefaultAuthorizationSettler, SettlerOptions};
use crate::store::InMemorySecurityStore;

/// Space holding user profiles in the main wiki
const USER_SPACE: &str = "XWiki";

/// Answers "may this user exercise this right on this entity"
pub struct AuthorizationManager {
    factory: Arc<SecurityReferenceFactory>,
    registry: Arc<RightRegistry>,
    cache: Arc<SecurityCache>,
    invalidator: Arc<SecurityCacheRulesInvalidator>,
    loader: SecurityCacheLoader,
    policy: Arc<dyn DeploymentPolicy>,
    metrics: Arc<AuthorizationMetrics>,
    superadmin: UserSecurityReference,
    config: AuthorizationConfig,
}

impl AuthorizationManager {
    /// Create a new manager over the given collaborators
    ///
    /// Rights listed in the configuration are registered on top of the
    /// built-in ones.
    pub fn new(
        config: AuthorizationConfig,
        rule_source: Arc<dyn RuleSource>,
        membership: Arc<dyn GroupMembership>,
        policy: Arc<dyn DeploymentPolicy>,
    ) -> Result<Self> {
        config.validate()?;

        let factory = Arc::new(SecurityReferenceFactory::new(config.engine.main_wiki.as_str()));
        let registry = Arc::new(RightRegistry::new());
        for right in &config.rights {
            let implied_by = right
                .implied_by
                .iter()
                .map(|name| resolve_right(&registry, name))
                .collect::<Result<Vec<_>>>()?;
            registry.register(right.description.clone(), &implied_by)?;
        }

        let superadmin = factory.new_user_reference(Some(&EntityReference::document(
            factory.main_wiki(),
            [USER_SPACE],
            config.engine.superadmin_name.as_str(),
        )))?;

        let settler = Arc::new(DefaultAuthorizationSettler::with_options(
            registry.clone(),
            SettlerOptions {
                exclusive_allow: config.engine.exclusive_allow,
                superadmin: Some(superadmin.clone()),
                superadmin_excluded_rights: config.engine.superadmin_excluded_rights.clone(),
            },
        ));
        let cache = Arc::new(SecurityCache::new(CacheConfig {
            capacity: config.cache.capacity,
        }));
        let invalidator = Arc::new(SecurityCacheRulesInvalidator::new(cache.clone()));
        let metrics = Arc::new(AuthorizationMetrics::with_enabled(config.metrics.enabled));
        let loader = SecurityCacheLoader::new(
            cache.clone(),
            invalidator.clone(),
            settler,
            registry.clone(),
            rule_source,
            membership,
        )
        .with_max_retries(config.engine.max_load_retries)
        .with_metrics(metrics.clone());

        info!(
            main_wiki = %factory.main_wiki(),
            capacity = config.cache.capacity,
            rights = registry.len(),
            "AuthorizationManager initialized"
        );

        Ok(Self {
            factory,
            registry,
            cache,
            invalidator,
            loader,
            policy,
            metrics,
            superadmin,
            config,
        })
    }

    /// Create a manager whose collaborators are all served by `store`
    pub fn with_store(config: AuthorizationConfig, store: Arc<InMemorySecurityStore>) -> Result<Self> {
        Self::new(config, store.clone(), store.clone(), store)
    }

    /// Whether `user` (`None` for the public user) holds `right` on `entity`
    /// (`None` for the main wiki)
    pub fn has_access(
        &self,
        right: &Right,
        user: Option<&EntityReference>,
        entity: Option<&EntityReference>,
    ) -> Result<bool> {
        let user = self.factory.new_user_reference(user)?;
        let entity = self.factory.new_entity_reference(entity)?;
        self.has_security_access(right, &user, &entity)
    }

    /// Same as [`has_access`](Self::has_access) over resolved references
    pub fn has_security_access(
        &self,
        right: &Right,
        user: &UserSecurityReference,
        entity: &SecurityReference,
    ) -> Result<bool> {
        let start = Instant::now();
        let result = self.evaluate(right, user, entity);

        match &result {
            Ok(allowed) => self.metrics.record_decision(*allowed),
            Err(err) => {
                warn!(right = %right, user = %user, entity = %entity, error = %err, "Access check failed");
                self.metrics.record_error();
            }
        }
        self.metrics.record_latency(start.elapsed());
        result
    }

    fn evaluate(
        &self,
        right: &Right,
        user: &UserSecurityReference,
        entity: &SecurityReference,
    ) -> Result<bool> {
        if right.is_illegal() {
            return Ok(false);
        }
        if !self.registry.contains(right) {
            debug!(right = %right, "Right no longer registered, using its default state");
            return Ok(right.default_state().is_allow());
        }
        if self.is_super_admin(user) {
            return Ok(!self.is_excluded_for_superadmin(right));
        }
        if user.is_public() && self.policy.needs_authentication(right) {
            debug!(right = %right, "Right requires an authenticated user");
            return Ok(false);
        }
        if self.policy.is_wiki_read_only() && !right.is_read_only() {
            debug!(right = %right, "Wiki is read-only");
            return Ok(false);
        }

        let access = match self.cache.get_access(user, entity) {
            Some(access) => {
                self.metrics.record_cache_hit();
                access
            }
            None => {
                self.metrics.record_cache_miss();
                self.loader.load(user, entity)?
            }
        };
        Ok(access.get(right).is_allow())
    }

    /// Fails with [`AuthzError::AccessDenied`] unless access is granted
    pub fn check_access(
        &self,
        right: &Right,
        user: Option<&EntityReference>,
        entity: Option<&EntityReference>,
    ) -> Result<()> {
        let user = self.factory.new_user_reference(user)?;
        let entity = self.factory.new_entity_reference(entity)?;

        if self.has_security_access(right, &user, &entity)? {
            Ok(())
        } else {
            Err(AuthzError::AccessDenied {
                right: right.name().to_string(),
                user: user.to_string(),
                entity: entity.to_string(),
            })
        }
    }

    /// Whether `user` is the superadmin account
    pub fn is_super_admin(&self, user: &UserSecurityReference) -> bool {
        *user == self.superadmin
    }

    fn is_excluded_for_superadmin(&self, right: &Right) -> bool {
        self.config
            .engine
            .superadmin_excluded_rights
            .iter()
            .any(|name| name.eq_ignore_ascii_case(right.name()))
    }

    /// Every right `user` holds on `entity`, ignoring the deployment hooks
    pub fn get_allowed_rights(
        &self,
        user: Option<&EntityReference>,
        entity: Option<&EntityReference>,
    ) -> Result<RightSet> {
        let user = self.factory.new_user_reference(user)?;
        let entity = self.factory.new_entity_reference(entity)?;

        let access = match self.cache.get_access(&user, &entity) {
            Some(access) => access,
            None => self.loader.load(&user, &entity)?,
        };
        Ok(access
            .allowed()
            .iter()
            .filter(|right| self.registry.contains(right))
            .cloned()
            .collect())
    }

    /// Registers a right; every right in `implied_by` will imply it
    ///
    /// Settled accesses never considered the new right, so the cache is
    /// dropped.
    pub fn register_right(&self, description: RightDescription, implied_by: &[Right]) -> Result<Right> {
        let known = !self.registry.to_right(&description.name).is_illegal();
        let right = self.registry.register(description, implied_by)?;
        if !known {
            self.invalidator.invalidate_all();
        }
        Ok(right)
    }

    /// Unregisters a right; built-in and read-only rights are protected
    pub fn unregister_right(&self, right: &Right) -> Result<()> {
        self.registry.unregister(right)
    }

    /// Looks up a right by name, ILLEGAL when unknown
    pub fn right(&self, name: &str) -> Right {
        self.registry.to_right(name)
    }

    pub fn registry(&self) -> &Arc<RightRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &Arc<SecurityReferenceFactory> {
        &self.factory
    }

    pub fn cache(&self) -> &Arc<SecurityCache> {
        &self.cache
    }

    /// Receiver of rule and membership change events
    pub fn invalidator(&self) -> &Arc<SecurityCacheRulesInvalidator> {
        &self.invalidator
    }

    pub fn metrics(&self) -> &Arc<AuthorizationMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }
}

fn resolve_right(registry: &RightRegistry, name: &str) -> Result<Right> {
    let right = registry.to_right(name);
    if right.is_illegal() {
        return Err(AuthzError::InvalidRight(format!("unknown right '{}'", name)));
    }
    Ok(right)
}
