//! Security cache
//!
//! Holds rule entries, subject entries, shadow entries and settled access
//! entries in one arena. Every entry records the entries it was derived
//! from (its parents) and the entries derived from it (its children), so
//! removing or evicting an entry drops everything that depended on it:
//!
//! - a rule entry depends on the rule entry of its parent reference
//! - a subject entry (user or group profile) also depends on the entries of
//!   the groups it belongs to
//! - a shadow entry mirrors a global subject into a sub-wiki and depends on
//!   the subject, the sub-wiki and the groups of that sub-wiki
//! - an access entry depends on the resource and on the subject (or its
//!   shadow when the resource lives in another wiki)
//!
//! No entry can therefore outlive the membership evidence it was built on.
//!
//! The arena sits behind a single reader/writer lock: lookups share it,
//! insertions and cascading removals hold it exclusively so a cascade is
//! never observed half-applied. Recency is tracked in a separate LRU list,
//! always locked after the arena.

mod node;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use wikisec_core::{GroupSecurityReference, SecurityReference, UserSecurityReference};

use self::node::{CacheKey, CacheNode, CachedValue, EntryId};
use crate::error::{CacheError, CacheResult};
use crate::rules::{SecurityAccessEntry, SecurityRuleEntry};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before least recently used ones are evicted
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Default)]
struct CacheState {
    nodes: HashMap<EntryId, CacheNode>,
    index: HashMap<CacheKey, EntryId>,
    next_id: EntryId,
}

impl CacheState {
    fn lookup(&self, key: &CacheKey) -> Option<&CacheNode> {
        self.index.get(key).and_then(|id| self.nodes.get(id))
    }

    fn require(&self, key: CacheKey) -> CacheResult<EntryId> {
        self.index
            .get(&key)
            .copied()
            .ok_or(CacheError::ParentEntryEvicted)
    }

    /// Rule entry of the reference's parent, none for the farm
    fn reference_parent(&self, reference: &SecurityReference) -> CacheResult<Option<EntryId>> {
        match reference.parent() {
            Some(parent) => self.require(CacheKey::Rules(parent.clone())).map(Some),
            None => Ok(None),
        }
    }

    fn group_parents(&self, groups: &BTreeSet<GroupSecurityReference>) -> CacheResult<Vec<EntryId>> {
        groups
            .iter()
            .map(|group| self.require(CacheKey::Rules(group.reference().clone())))
            .collect()
    }

    fn link(&mut self, child: EntryId, parents: &[EntryId]) {
        for parent in parents {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.insert(child);
            }
        }
    }
}

/// Removes `root` and, transitively, every entry depending on it
///
/// Returns the number of entries removed.
fn dispose(state: &mut CacheState, lru: &mut LruCache<EntryId, ()>, root: EntryId) -> usize {
    let mut stack = vec![root];
    let mut removed = 0;

    while let Some(id) = stack.pop() {
        let Some(node) = state.nodes.remove(&id) else {
            continue;
        };
        state.index.remove(&node.key);
        lru.pop(&id);

        for parent in &node.parents {
            if let Some(parent) = state.nodes.get_mut(parent) {
                parent.children.remove(&id);
            }
        }

        debug!(key = %node.key, "Disposed cache entry");
        stack.extend(node.children.iter().copied());
        removed += 1;
    }

    removed
}

/// Dependency-tracking cache of rules, subjects and settled accesses
pub struct SecurityCache {
    state: RwLock<CacheState>,
    lru: Mutex<LruCache<EntryId, ()>>,
    config: CacheConfig,
    stats: DashMap<String, usize>,
}

impl SecurityCache {
    /// Create a new security cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            lru: Mutex::new(LruCache::unbounded()),
            config,
            stats: DashMap::new(),
        }
    }

    /// Settled access of `user` on `reference`
    pub fn get_access(
        &self,
        user: &UserSecurityReference,
        reference: &SecurityReference,
    ) -> Option<Arc<SecurityAccessEntry>> {
        let key = CacheKey::Access(user.clone(), reference.clone());
        let found = self.get(&key, |value| match value {
            CachedValue::Access(entry) => Some(entry.clone()),
            _ => None,
        });

        match &found {
            Some(_) => {
                self.increment_stat("hits");
                debug!(key = %key, "Access cache hit");
            }
            None => {
                self.increment_stat("misses");
                debug!(key = %key, "Access cache miss");
            }
        }
        found
    }

    /// Rules attached to `reference`
    pub fn get_rules(&self, reference: &SecurityReference) -> Option<Arc<SecurityRuleEntry>> {
        self.get(&CacheKey::Rules(reference.clone()), |value| match value {
            CachedValue::Rules { entry, .. } => Some(entry.clone()),
            _ => None,
        })
    }

    fn get<T>(&self, key: &CacheKey, extract: impl FnOnce(&CachedValue) -> Option<T>) -> Option<T> {
        let state = self.state.read();
        let id = *state.index.get(key)?;
        let value = state.nodes.get(&id).and_then(|node| extract(&node.value))?;
        // Reads only refresh recency when the list is free; eviction order is approximate
        if let Some(mut lru) = self.lru.try_lock() {
            lru.get(&id);
        }
        Some(value)
    }

    /// Every group `user` belongs to, transitively, as recorded by the cache
    ///
    /// `entity_wiki` is the sub-wiki of the resource when a global subject is
    /// checked there; the memberships it holds in that wiki are then
    /// included. Returns `None` when the subject (or its shadow) is not
    /// cached as a subject.
    pub fn get_groups_for(
        &self,
        user: &UserSecurityReference,
        entity_wiki: Option<&SecurityReference>,
    ) -> Option<BTreeSet<GroupSecurityReference>> {
        let Some(document) = user.security_reference() else {
            return Some(BTreeSet::new());
        };

        let state = self.state.read();
        let origin = *state.index.get(&CacheKey::Rules(document.clone()))?;
        let node = state.nodes.get(&origin)?;
        if !node.is_subject() {
            return None;
        }

        let mut visited: HashSet<EntryId> = HashSet::from([origin]);
        let mut pending: Vec<EntryId> = node.parents.clone();

        if let Some(wiki) = entity_wiki {
            let shadow_id = *state
                .index
                .get(&CacheKey::Shadow(document.clone(), wiki.clone()))?;
            let shadow = state.nodes.get(&shadow_id)?;
            visited.insert(shadow_id);
            pending.extend(shadow.parents.iter().copied());
        }

        let mut groups = BTreeSet::new();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = state.nodes.get(&id) else {
                continue;
            };
            let Some(group) = node.group() else {
                continue;
            };

            pending.extend(node.parents.iter().copied());
            if let Some(wiki) = entity_wiki {
                if group.is_global() {
                    let shadow = CacheKey::Shadow(group.reference().clone(), wiki.clone());
                    if let Some(shadow_id) = state.index.get(&shadow) {
                        pending.push(*shadow_id);
                    }
                }
            }
            groups.insert(group);
        }

        Some(groups)
    }

    /// Whether the shadow of `subject` in `wiki` is cached
    pub fn has_shadow(&self, subject: &UserSecurityReference, wiki: &SecurityReference) -> bool {
        match subject.security_reference() {
            Some(document) => self
                .state
                .read()
                .index
                .contains_key(&CacheKey::Shadow(document.clone(), wiki.clone())),
            None => false,
        }
    }

    /// Groups `user` belongs to directly, `None` when not cached as a subject
    pub fn get_immediate_groups_for(
        &self,
        user: &UserSecurityReference,
    ) -> Option<BTreeSet<GroupSecurityReference>> {
        let Some(document) = user.security_reference() else {
            return Some(BTreeSet::new());
        };

        let state = self.state.read();
        let node = state.lookup(&CacheKey::Rules(document.clone()))?;
        if !node.is_subject() {
            return None;
        }
        Some(
            node.parents
                .iter()
                .filter_map(|id| state.nodes.get(id))
                .filter_map(CacheNode::group)
                .collect(),
        )
    }

    /// Caches the rules of a resource
    ///
    /// The rules of the parent reference must already be cached.
    pub fn add_rules(&self, entry: SecurityRuleEntry) -> CacheResult<Arc<SecurityRuleEntry>> {
        let key = CacheKey::Rules(entry.reference().clone());
        let mut state = self.state.write();

        if let Some(node) = state.lookup(&key) {
            return match &node.value {
                CachedValue::Rules { entry: existing, .. } if **existing == entry => {
                    Ok(existing.clone())
                }
                _ => Err(self.conflict(&key)),
            };
        }

        let parents: Vec<EntryId> = state.reference_parent(entry.reference())?.into_iter().collect();
        let entry = Arc::new(entry);
        let value = CachedValue::Rules {
            entry: entry.clone(),
            subject: None,
        };
        self.insert(&mut state, key, value, parents)?;
        Ok(entry)
    }

    /// Caches the rules of a user or group profile along with its direct
    /// groups
    ///
    /// A profile already cached as a plain document is upgraded in place.
    pub fn add_subject(
        &self,
        subject: &UserSecurityReference,
        entry: SecurityRuleEntry,
        groups: &BTreeSet<GroupSecurityReference>,
    ) -> CacheResult<Arc<SecurityRuleEntry>> {
        if subject.security_reference() != Some(entry.reference()) {
            return Err(CacheError::ConflictingInsertion);
        }

        let key = CacheKey::Rules(entry.reference().clone());
        let mut state = self.state.write();
        let group_parents = state.group_parents(groups)?;

        if let Some(&id) = state.index.get(&key) {
            return self.upgrade_subject(&mut state, id, subject, &entry, group_parents);
        }

        let mut parents: Vec<EntryId> = state.reference_parent(entry.reference())?.into_iter().collect();
        parents.extend(group_parents);

        let entry = Arc::new(entry);
        let value = CachedValue::Rules {
            entry: entry.clone(),
            subject: Some(subject.clone()),
        };
        self.insert(&mut state, key, value, parents)?;
        Ok(entry)
    }

    fn upgrade_subject(
        &self,
        state: &mut CacheState,
        id: EntryId,
        subject: &UserSecurityReference,
        entry: &SecurityRuleEntry,
        group_parents: Vec<EntryId>,
    ) -> CacheResult<Arc<SecurityRuleEntry>> {
        let Some(node) = state.nodes.get_mut(&id) else {
            return Err(CacheError::ConflictingInsertion);
        };
        let key = node.key.clone();

        let existing = match &mut node.value {
            CachedValue::Rules {
                entry: existing,
                subject: cached,
            } if **existing == *entry && cached.as_ref().map_or(true, |s| s == subject) => {
                if cached.is_none() {
                    debug!(key = %key, "Upgraded cache entry to subject");
                    *cached = Some(subject.clone());
                }
                existing.clone()
            }
            _ => return Err(self.conflict(&key)),
        };

        for parent in &group_parents {
            node.add_parent(*parent);
        }
        state.link(id, &group_parents);
        Ok(existing)
    }

    /// Caches the memberships a global subject holds in a sub-wiki
    ///
    /// Global groups among `groups` are linked through their own shadow in
    /// the same wiki.
    pub fn add_shadow(
        &self,
        subject: &UserSecurityReference,
        wiki: &SecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
    ) -> CacheResult<()> {
        let Some(document) = subject.security_reference() else {
            return Err(CacheError::ConflictingInsertion);
        };

        let key = CacheKey::Shadow(document.clone(), wiki.clone());
        let mut state = self.state.write();
        if let Some(node) = state.lookup(&key) {
            return match &node.value {
                CachedValue::Shadow { subject: cached, .. } if cached == subject => Ok(()),
                _ => Err(self.conflict(&key)),
            };
        }

        let mut parents = vec![
            state.require(CacheKey::Rules(document.clone()))?,
            state.require(CacheKey::Rules(wiki.clone()))?,
        ];
        for group in groups {
            let group_key = if group.is_global() {
                CacheKey::Shadow(group.reference().clone(), wiki.clone())
            } else {
                CacheKey::Rules(group.reference().clone())
            };
            parents.push(state.require(group_key)?);
        }

        let value = CachedValue::Shadow {
            subject: subject.clone(),
            wiki: wiki.clone(),
        };
        self.insert(&mut state, key, value, parents)?;
        Ok(())
    }

    /// Caches a settled access
    ///
    /// `wiki` is the sub-wiki of the resource when the subject is global and
    /// the resource is not; the subject's shadow in that wiki must be cached.
    pub fn add_access(
        &self,
        entry: SecurityAccessEntry,
        wiki: Option<&SecurityReference>,
    ) -> CacheResult<Arc<SecurityAccessEntry>> {
        let key = CacheKey::Access(entry.user().clone(), entry.reference().clone());
        let mut state = self.state.write();

        if let Some(node) = state.lookup(&key) {
            return match &node.value {
                CachedValue::Access(existing) if **existing == entry => Ok(existing.clone()),
                _ => Err(self.conflict(&key)),
            };
        }

        let mut parents = vec![state.require(CacheKey::Rules(entry.reference().clone()))?];
        if let Some(document) = entry.user().security_reference() {
            if document != entry.reference() {
                let subject_key = match wiki {
                    Some(wiki) => CacheKey::Shadow(document.clone(), wiki.clone()),
                    None => CacheKey::Rules(document.clone()),
                };
                parents.push(state.require(subject_key)?);
            }
        }

        let entry = Arc::new(entry);
        self.insert(&mut state, key, CachedValue::Access(entry.clone()), parents)?;
        Ok(entry)
    }

    fn insert(
        &self,
        state: &mut CacheState,
        key: CacheKey,
        value: CachedValue,
        parents: Vec<EntryId>,
    ) -> CacheResult<EntryId> {
        let id = state.next_id;
        state.next_id += 1;

        let mut lru = self.lru.lock();
        for parent in &parents {
            lru.get(parent);
        }

        state.link(id, &parents);
        state.index.insert(key.clone(), id);
        debug!(key = %key, parents = parents.len(), "Cached entry");
        state.nodes.insert(id, CacheNode::new(key, value, parents));
        lru.put(id, ());

        while state.nodes.len() > self.config.capacity {
            let Some((victim, _)) = lru.pop_lru() else {
                break;
            };
            let removed = dispose(state, &mut lru, victim);
            self.add_stat("evictions", 1);
            self.add_stat("cascades", removed.saturating_sub(1));
        }

        if state.nodes.contains_key(&id) {
            Ok(id)
        } else {
            // The entry was evicted together with one of its parents
            debug!(id, "Inserted entry evicted itself");
            Err(CacheError::ConflictingInsertion)
        }
    }

    /// Removes the entry of `reference` and everything depending on it
    ///
    /// Returns whether an entry was cached.
    pub fn remove(&self, reference: &SecurityReference) -> bool {
        self.remove_key(&CacheKey::Rules(reference.clone()))
    }

    /// Removes a settled access
    pub fn remove_access(&self, user: &UserSecurityReference, reference: &SecurityReference) -> bool {
        self.remove_key(&CacheKey::Access(user.clone(), reference.clone()))
    }

    /// Removes the shadow of `subject` in `wiki` and everything depending on it
    pub fn remove_shadow(&self, subject: &UserSecurityReference, wiki: &SecurityReference) -> bool {
        match subject.security_reference() {
            Some(document) => self.remove_key(&CacheKey::Shadow(document.clone(), wiki.clone())),
            None => false,
        }
    }

    fn remove_key(&self, key: &CacheKey) -> bool {
        let mut state = self.state.write();
        let Some(&id) = state.index.get(key) else {
            return false;
        };

        let mut lru = self.lru.lock();
        let removed = dispose(&mut state, &mut lru, id);
        self.add_stat("cascades", removed.saturating_sub(1));
        debug!(key = %key, removed, "Removed cache entry");
        true
    }

    /// Drops every entry
    pub fn clear(&self) {
        let mut state = self.state.write();
        let mut lru = self.lru.lock();
        let entries = state.nodes.len();
        state.nodes.clear();
        state.index.clear();
        lru.clear();
        info!(entries, "Security cache cleared");
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            evictions: self.get_stat("evictions"),
            cascaded_removals: self.get_stat("cascades"),
            conflicts: self.get_stat("conflicts"),
            entries: self.len(),
            capacity: self.config.capacity,
        }
    }

    fn conflict(&self, key: &CacheKey) -> CacheError {
        self.increment_stat("conflicts");
        debug!(key = %key, "Conflicting cache insertion");
        CacheError::ConflictingInsertion
    }

    fn increment_stat(&self, key: &str) {
        self.add_stat(key, 1);
    }

    fn add_stat(&self, key: &str, amount: usize) {
        if amount == 0 {
            return;
        }
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += amount)
            .or_insert(amount);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for SecurityCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    /// Dependents removed along with an evicted or invalidated entry
    pub cascaded_removals: usize,
    pub conflicts: usize,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate access hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
