//! In-memory security store
//!
//! Implements every collaborator trait over plain maps. Used by tests,
//! benchmarks and small embeddings; can be seeded from a JSON fixture.
//!
//! ```
//! use wikisec_authz::store::InMemorySecurityStore;
//! use wikisec_authz::rights::RightRegistry;
//! use wikisec_core::SecurityReferenceFactory;
//!
//! let json = r#"{
//!     "rules": [{
//!         "entity": { "wiki": "xwiki", "spaces": ["Main"] },
//!         "state": "allow",
//!         "rights": ["edit"],
//!         "users": ["xwiki:XWiki.Alice"]
//!     }],
//!     "groups": [{ "group": "xwiki:XWiki.Editors", "users": ["xwiki:XWiki.Bob"] }]
//! }"#;
//!
//! let factory = SecurityReferenceFactory::new("xwiki");
//! let registry = RightRegistry::new();
//! let store = InMemorySecurityStore::from_json(json, &factory, &registry).unwrap();
//! assert_eq!(store.read_count(), 0);
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use wikisec_core::{
    EntityReference, EntityType, GroupSecurityReference, SecurityReference, SecurityReferenceFactory,
    UserSecurityReference,
};

use crate::bridge::{DeploymentPolicy, GroupMembership, RuleSource};
use crate::error::{AuthzError, CollaboratorError, CollaboratorResult, Result};
use crate::rights::{Right, RightRegistry, RightSet, RuleState};
use crate::rules::{SecurityRule, SecurityRuleEntry};

/// Rules, owners and group memberships held in memory
#[derive(Debug, Default)]
pub struct InMemorySecurityStore {
    rules: DashMap<SecurityReference, Vec<SecurityRule>>,
    owners: DashMap<SecurityReference, UserSecurityReference>,
    /// Implicit rules granting a document's creator the creator right
    creators: DashMap<SecurityReference, SecurityRule>,
    members: DashMap<GroupSecurityReference, BTreeSet<UserSecurityReference>>,
    needs_authentication: RwLock<BTreeSet<String>>,
    read_only: AtomicBool,
    fail_reads: AtomicBool,
    stats: DashMap<String, usize>,
}

impl InMemorySecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches one more rule to `reference`
    pub fn add_rules(&self, reference: &SecurityReference, rule: SecurityRule) {
        self.rules.entry(reference.clone()).or_default().push(rule);
    }

    /// Replaces the rules attached to `reference`
    pub fn set_rules(&self, reference: &SecurityReference, rules: Vec<SecurityRule>) {
        self.rules.insert(reference.clone(), rules);
    }

    pub fn clear_rules(&self, reference: &SecurityReference) {
        self.rules.remove(reference);
    }

    /// Sets the owner of a wiki
    pub fn set_owner(&self, wiki: &SecurityReference, owner: UserSecurityReference) {
        self.owners.insert(wiki.clone(), owner);
    }

    /// Records `creator` as the creator of `document`, granting it `creator_right` there
    pub fn set_creator(
        &self,
        document: &SecurityReference,
        creator: UserSecurityReference,
        creator_right: &Right,
    ) {
        let rule = SecurityRule::allow([creator_right.clone()])
            .for_user(creator)
            .for_entity_types([EntityType::Document]);
        self.creators.insert(document.clone(), rule);
    }

    /// Adds `member` (a user or a group) to `group`
    pub fn add_member(&self, group: &GroupSecurityReference, member: UserSecurityReference) {
        self.members.entry(group.clone()).or_default().insert(member);
    }

    pub fn remove_member(&self, group: &GroupSecurityReference, member: &UserSecurityReference) {
        if let Some(mut members) = self.members.get_mut(group) {
            members.remove(member);
        }
    }

    /// Refuses `right` to the public user
    pub fn require_authentication(&self, right: &str) {
        self.needs_authentication.write().insert(right.to_lowercase());
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Makes every read fail until switched off again
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of rule reads served
    pub fn rule_reads(&self) -> usize {
        self.get_stat("rule_reads")
    }

    /// Number of group lookups served
    pub fn group_reads(&self) -> usize {
        self.get_stat("group_reads")
    }

    /// Total number of collaborator calls served
    pub fn read_count(&self) -> usize {
        self.rule_reads() + self.group_reads()
    }

    /// Seeds a store from a JSON fixture
    pub fn from_json(
        json: &str,
        factory: &SecurityReferenceFactory,
        registry: &RightRegistry,
    ) -> Result<Self> {
        let store = Self::new();
        store.load_json(json, factory, registry)?;
        Ok(store)
    }

    /// Adds the content of a JSON fixture to this store
    ///
    /// Lets a store already handed to a manager be seeded with that
    /// manager's factory and registry.
    pub fn load_json(
        &self,
        json: &str,
        factory: &SecurityReferenceFactory,
        registry: &RightRegistry,
    ) -> Result<()> {
        let fixture: StoreFixture = serde_json::from_str(json)
            .map_err(|e| AuthzError::configuration(format!("invalid store fixture: {}", e)))?;
        fixture.apply(self, factory, registry)
    }

    fn check_available(&self) -> CollaboratorResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl RuleSource for InMemorySecurityStore {
    fn read_rules(&self, reference: &SecurityReference) -> CollaboratorResult<SecurityRuleEntry> {
        self.check_available()?;
        self.increment_stat("rule_reads");

        let mut rules = self
            .rules
            .get(reference)
            .map(|rules| rules.clone())
            .unwrap_or_default();
        if let Some(rule) = self.creators.get(reference) {
            rules.push(rule.clone());
        }
        debug!(reference = %reference, rules = rules.len(), "Read rules");

        let entry = SecurityRuleEntry::new(reference.clone(), rules);
        Ok(match self.owners.get(reference) {
            Some(owner) if reference.entity_type().is_wiki_level() => entry.with_owner(owner.clone()),
            _ => entry,
        })
    }
}

impl GroupMembership for InMemorySecurityStore {
    fn groups_of(
        &self,
        subject: &UserSecurityReference,
        wiki: &SecurityReference,
    ) -> CollaboratorResult<Vec<GroupSecurityReference>> {
        self.check_available()?;
        self.increment_stat("group_reads");

        let mut groups: Vec<GroupSecurityReference> = self
            .members
            .iter()
            .filter(|entry| entry.key().wiki() == wiki && entry.value().contains(subject))
            .map(|entry| entry.key().clone())
            .collect();
        groups.sort();
        Ok(groups)
    }
}

impl DeploymentPolicy for InMemorySecurityStore {
    fn needs_authentication(&self, right: &Right) -> bool {
        self.needs_authentication.read().contains(right.name())
    }

    fn is_wiki_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}

/// JSON layout of a store fixture
///
/// Users and groups are written as document references
/// (`wiki:Space.Page`); entities as structured references so wikis and
/// spaces can be named too.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreFixture {
    rules: Vec<RuleFixture>,
    groups: Vec<GroupFixture>,
    owners: Vec<OwnerFixture>,
    needs_authentication: Vec<String>,
    read_only: bool,
}

#[derive(Debug, Deserialize)]
struct RuleFixture {
    entity: EntityReference,
    state: RuleState,
    rights: Vec<String>,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    entity_types: Option<Vec<EntityType>>,
}

#[derive(Debug, Deserialize)]
struct GroupFixture {
    group: String,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerFixture {
    wiki: String,
    owner: String,
}

fn user(factory: &SecurityReferenceFactory, raw: &str) -> Result<UserSecurityReference> {
    Ok(factory.new_user_reference(Some(&raw.parse::<EntityReference>()?))?)
}

fn group(factory: &SecurityReferenceFactory, raw: &str) -> Result<GroupSecurityReference> {
    Ok(factory.new_group_reference(&raw.parse::<EntityReference>()?)?)
}

impl StoreFixture {
    fn apply(
        self,
        store: &InMemorySecurityStore,
        factory: &SecurityReferenceFactory,
        registry: &RightRegistry,
    ) -> Result<()> {
        for fixture in self.rules {
            let entity = factory.new_entity_reference(Some(&fixture.entity))?;
            let rights = fixture
                .rights
                .iter()
                .map(|name| match registry.to_right(name) {
                    right if right.is_illegal() => Err(AuthzError::InvalidRight(name.clone())),
                    right => Ok(right),
                })
                .collect::<Result<RightSet>>()?;

            let mut rule = SecurityRule::new(rights, fixture.state);
            for raw in &fixture.users {
                rule = rule.for_user(user(factory, raw)?);
            }
            for raw in &fixture.groups {
                rule = rule.for_group(group(factory, raw)?);
            }
            if let Some(types) = fixture.entity_types {
                rule = rule.for_entity_types(types);
            }
            store.add_rules(&entity, rule);
        }

        for fixture in self.groups {
            let target = group(factory, &fixture.group)?;
            for raw in &fixture.users {
                store.add_member(&target, user(factory, raw)?);
            }
            for raw in &fixture.groups {
                store.add_member(&target, group(factory, raw)?.into());
            }
        }

        for fixture in self.owners {
            store.set_owner(&factory.wiki(&fixture.wiki)?, user(factory, &fixture.owner)?);
        }
        for right in &self.needs_authentication {
            store.require_authentication(right);
        }
        if self.read_only {
            store.set_read_only(true);
        }

        Ok(())
    }
}
