//! Reference factory with node interning
//!
//! Resolves raw [`EntityReference`]s into [`SecurityReference`] chains. Wiki
//! and space nodes are interned so that every chain handed out by one
//! factory shares them, which keeps equality checks on the hot path cheap.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::types::{
    EntityReference, EntityType, GroupSecurityReference, SecurityReference,
    UserSecurityReference,
};

/// Statistics about node interning
#[derive(Debug, Clone, Default)]
pub struct InternStats {
    /// Lookups answered by an existing node
    pub hits: usize,
    /// Lookups that created a node
    pub misses: usize,
    /// Number of interned nodes
    pub entries: usize,
}

impl InternStats {
    /// Calculates the intern hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Builds canonical security references for one farm
///
/// # Examples
///
/// ```
/// use wikisec_core::{EntityReference, SecurityReferenceFactory};
///
/// let factory = SecurityReferenceFactory::new("xwiki");
/// let raw: EntityReference = "dev:Main.WebHome".parse().unwrap();
/// let a = factory.new_entity_reference(Some(&raw)).unwrap();
/// let b = factory
///     .new_entity_reference(Some(&EntityReference::document("dev", ["Main"], "Other")))
///     .unwrap();
///
/// assert_eq!(a.parent(), b.parent());
/// assert_eq!(a.wiki().key(), "dev");
/// ```
pub struct SecurityReferenceFactory {
    farm: SecurityReference,
    /// Interned wiki and space nodes by entity type and canonical key
    nodes: Arc<DashMap<(EntityType, String), SecurityReference>>,
    /// Interning statistics
    stats: Arc<DashMap<String, usize>>,
}

impl SecurityReferenceFactory {
    /// Creates a factory whose farm stands for `main_wiki`
    pub fn new(main_wiki: impl Into<String>) -> Self {
        let main_wiki = main_wiki.into().to_lowercase();
        Self {
            farm: SecurityReference::farm(main_wiki),
            nodes: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
        }
    }

    /// The farm (main wiki) reference
    pub fn farm(&self) -> &SecurityReference {
        &self.farm
    }

    /// Name of the main wiki
    pub fn main_wiki(&self) -> &str {
        self.farm.name()
    }

    /// Resolves the wiki level for `name`; the main wiki resolves to the farm
    pub fn wiki(&self, name: &str) -> Result<SecurityReference> {
        let name = name.to_lowercase();
        if name == self.main_wiki() {
            return Ok(self.farm.clone());
        }
        let farm = self.farm.clone();
        self.intern(&farm, EntityType::Wiki, &name)
    }

    /// Normalizes a raw reference: fills in the main wiki when missing and
    /// lower-cases the wiki name
    pub fn to_compatible_entity_reference(&self, reference: &EntityReference) -> EntityReference {
        let wiki = match &reference.wiki {
            Some(wiki) => wiki.to_lowercase(),
            None => self.main_wiki().to_string(),
        };
        EntityReference {
            wiki: Some(wiki),
            spaces: reference.spaces.clone(),
            document: reference.document.clone(),
        }
    }

    /// Resolves a raw reference; `None` denotes the main wiki itself
    pub fn new_entity_reference(&self, reference: Option<&EntityReference>) -> Result<SecurityReference> {
        let reference = match reference {
            Some(reference) => self.to_compatible_entity_reference(reference),
            None => return Ok(self.farm.clone()),
        };
        reference.validate()?;

        let mut current = self.wiki(reference.wiki.as_deref().unwrap_or_default())?;
        for space in &reference.spaces {
            current = self.intern(&current, EntityType::Space, space)?;
        }

        match &reference.document {
            // Documents are not interned; there are far too many of them
            Some(document) => SecurityReference::child(&current, EntityType::Document, document),
            None => Ok(current),
        }
    }

    /// Resolves a user reference; `None` denotes the public user
    pub fn new_user_reference(&self, user: Option<&EntityReference>) -> Result<UserSecurityReference> {
        match user {
            Some(user) => UserSecurityReference::new(self.new_entity_reference(Some(user))?),
            None => Ok(UserSecurityReference::public(self.farm.clone())),
        }
    }

    /// Resolves a group reference
    pub fn new_group_reference(&self, group: &EntityReference) -> Result<GroupSecurityReference> {
        GroupSecurityReference::new(self.new_entity_reference(Some(group))?)
    }

    /// Get interning statistics
    pub fn stats(&self) -> InternStats {
        InternStats {
            hits: self.stats.get("hits").map(|v| *v).unwrap_or(0),
            misses: self.stats.get("misses").map(|v| *v).unwrap_or(0),
            entries: self.nodes.len(),
        }
    }

    fn intern(&self, parent: &SecurityReference, entity_type: EntityType, name: &str) -> Result<SecurityReference> {
        let candidate = SecurityReference::child(parent, entity_type, name)?;
        let key = (entity_type, candidate.key().to_string());

        if let Some(existing) = self.nodes.get(&key) {
            self.increment_stat("hits");
            return Ok(existing.clone());
        }

        self.increment_stat("misses");
        trace!(reference = %candidate, "Interning reference node");
        Ok(self.nodes.entry(key).or_insert(candidate).clone())
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
    }
}
