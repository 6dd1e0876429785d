//! Cache loader
//!
//! Fills the security cache for one (user, entity) pair: the rule chain of
//! the entity, the user's profile and groups (recursively), the shadows of a
//! global user inside a sub-wiki, and finally the settled access entry.
//!
//! Another thread may evict or replace entries while a load is running.
//! The cache reports this as a [`CacheError`]; the loader then starts over,
//! up to a bounded number of attempts.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error};

use wikisec_core::{GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::bridge::{GroupMembership, RuleSource};
use crate::cache::SecurityCache;
use crate::engine::metrics::AuthorizationMetrics;
use crate::error::{AuthzError, CacheError, CollaboratorError, Result};
use crate::invalidator::SecurityCacheRulesInvalidator;
use crate::rights::RightRegistry;
use crate::rules::{SecurityAccessEntry, SecurityRuleEntry};
use crate::settler::AuthorizationSettler;

/// Default number of load attempts
pub const DEFAULT_MAX_LOAD_RETRIES: usize = 5;

/// Why one load attempt stopped
#[derive(Debug)]
enum LoadError {
    /// The cache changed under the load; worth another attempt
    Cache(CacheError),
    /// Anything else; reported as is
    Authz(AuthzError),
}

impl From<CacheError> for LoadError {
    fn from(err: CacheError) -> Self {
        LoadError::Cache(err)
    }
}

impl From<CollaboratorError> for LoadError {
    fn from(err: CollaboratorError) -> Self {
        LoadError::Authz(err.into())
    }
}

type LoadResult<T> = std::result::Result<T, LoadError>;

/// Populates the security cache on access misses
pub struct SecurityCacheLoader {
    cache: Arc<SecurityCache>,
    invalidator: Arc<SecurityCacheRulesInvalidator>,
    settler: Arc<dyn AuthorizationSettler>,
    registry: Arc<RightRegistry>,
    rule_source: Arc<dyn RuleSource>,
    membership: Arc<dyn GroupMembership>,
    metrics: Arc<AuthorizationMetrics>,
    max_retries: usize,
}

impl SecurityCacheLoader {
    pub fn new(
        cache: Arc<SecurityCache>,
        invalidator: Arc<SecurityCacheRulesInvalidator>,
        settler: Arc<dyn AuthorizationSettler>,
        registry: Arc<RightRegistry>,
        rule_source: Arc<dyn RuleSource>,
        membership: Arc<dyn GroupMembership>,
    ) -> Self {
        Self {
            cache,
            invalidator,
            settler,
            registry,
            rule_source,
            membership,
            metrics: Arc::new(AuthorizationMetrics::with_enabled(false)),
            max_retries: DEFAULT_MAX_LOAD_RETRIES,
        }
    }

    /// Set the number of attempts before giving up (at least one)
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Report retries to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<AuthorizationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Loads and caches the access of `user` on `entity`
    pub fn load(
        &self,
        user: &UserSecurityReference,
        entity: &SecurityReference,
    ) -> Result<Arc<SecurityAccessEntry>> {
        let mut last = CacheError::ParentEntryEvicted;

        for attempt in 1..=self.max_retries {
            let result = {
                let _suspended = self.invalidator.suspend();
                self.load_access(user, entity)
            };

            match result {
                Ok(entry) => return Ok(entry),
                Err(LoadError::Authz(err)) => return Err(err),
                Err(LoadError::Cache(err)) => {
                    debug!(user = %user, entity = %entity, attempt, error = %err, "Retrying cache load");
                    self.metrics.record_load_retry();
                    last = err;
                }
            }
        }

        error!(
            user = %user,
            entity = %entity,
            attempts = self.max_retries,
            "Giving up loading the security cache"
        );
        Err(AuthzError::CacheLoad(format!(
            "access of {} on {} after {} attempts: {}",
            user, entity, self.max_retries, last
        )))
    }

    fn load_access(
        &self,
        user: &UserSecurityReference,
        entity: &SecurityReference,
    ) -> LoadResult<Arc<SecurityAccessEntry>> {
        if let Some(entry) = self.cache.get_access(user, entity) {
            return Ok(entry);
        }

        // A global user reaching into a sub-wiki also carries the groups it
        // holds in that wiki
        let entity_wiki = Some(entity.wiki())
            .filter(|wiki| !user.is_public() && user.is_global() && !wiki.is_farm());

        let chain = self.load_rules(entity)?;

        let groups = match user.security_reference() {
            None => BTreeSet::new(),
            Some(_) => {
                let mut branch: Vec<GroupSecurityReference> = user.to_group().into_iter().collect();
                self.load_subject(user, &mut branch)?;
                if let Some(wiki) = &entity_wiki {
                    self.load_shadow(user, wiki, &mut branch)?;
                }
                self.cache
                    .get_groups_for(user, entity_wiki.as_ref())
                    .ok_or(CacheError::ParentEntryEvicted)?
            }
        };

        let allowed = self.settler.settle(user, &groups, &chain);
        debug!(user = %user, entity = %entity, allowed = ?allowed.names(), "Settled access");

        let entry = SecurityAccessEntry::new(user.clone(), entity.clone(), allowed);
        Ok(self.cache.add_access(entry, entity_wiki.as_ref())?)
    }

    /// Rule chain of `entity`, nearest first, caching missing levels
    fn load_rules(&self, entity: &SecurityReference) -> LoadResult<Vec<Arc<SecurityRuleEntry>>> {
        let mut chain = Vec::with_capacity(entity.depth() + 1);
        for reference in entity.chain().into_iter().rev() {
            let entry = match self.cache.get_rules(&reference) {
                Some(entry) => entry,
                None => self.cache.add_rules(self.read_rules(&reference)?)?,
            };
            chain.push(entry);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Reads a level, skipping levels where no right can be set
    fn read_rules(&self, reference: &SecurityReference) -> LoadResult<SecurityRuleEntry> {
        if self.registry.enabled_rights(reference.entity_type()).is_empty() {
            return Ok(SecurityRuleEntry::empty(reference.clone()));
        }
        let entry = self.rule_source.read_rules(reference)?;
        if entry.reference() != reference {
            return Err(CollaboratorError::Malformed(format!(
                "rules read for {} belong to {}",
                reference,
                entry.reference()
            ))
            .into());
        }
        Ok(entry)
    }

    /// Caches `subject` as a subject along with its groups, recursively
    ///
    /// `branch` holds the groups being loaded above this one; a group met
    /// again on its own branch is a membership cycle and is not followed.
    fn load_subject(
        &self,
        subject: &UserSecurityReference,
        branch: &mut Vec<GroupSecurityReference>,
    ) -> LoadResult<()> {
        let Some(document) = subject.security_reference() else {
            return Ok(());
        };
        if self.cache.get_immediate_groups_for(subject).is_some() {
            return Ok(());
        }

        let mut groups = BTreeSet::new();
        for group in self.membership.groups_of(subject, subject.wiki())? {
            if branch.contains(&group) {
                debug!(subject = %subject, group = %group, "Skipping group membership cycle");
                continue;
            }
            branch.push(group.clone());
            let loaded = self.load_subject(group.as_user(), branch);
            branch.pop();
            loaded?;
            groups.insert(group);
        }

        if let Some(parent) = document.parent() {
            self.load_rules(parent)?;
        }
        let entry = match self.cache.get_rules(document) {
            Some(entry) => SecurityRuleEntry::clone(&entry),
            None => self.read_rules(document)?,
        };
        self.cache.add_subject(subject, entry, &groups)?;
        Ok(())
    }

    /// Caches the memberships of a global `subject` in the sub-wiki `wiki`
    fn load_shadow(
        &self,
        subject: &UserSecurityReference,
        wiki: &SecurityReference,
        branch: &mut Vec<GroupSecurityReference>,
    ) -> LoadResult<()> {
        if self.cache.has_shadow(subject, wiki) {
            return Ok(());
        }

        let mut groups = BTreeSet::new();
        for group in self.membership.groups_of(subject, wiki)? {
            if group.wiki() != wiki || branch.contains(&group) {
                continue;
            }
            branch.push(group.clone());
            let loaded = self.load_subject(group.as_user(), branch);
            branch.pop();
            loaded?;
            groups.insert(group);
        }

        // Global groups follow their member into the wiki
        let global = self
            .cache
            .get_immediate_groups_for(subject)
            .ok_or(CacheError::ParentEntryEvicted)?;
        for group in global {
            if branch.contains(&group) {
                continue;
            }
            branch.push(group.clone());
            let loaded = self.load_shadow(group.as_user(), wiki, branch);
            branch.pop();
            loaded?;
            groups.insert(group);
        }

        self.cache.add_shadow(subject, wiki, &groups)?;
        Ok(())
    }
}
