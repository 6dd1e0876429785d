//! Rules invalidator
//!
//! Turns change notifications from the wiki into cache removals. Every
//! event takes the exclusive side of a lock whose shared side is held by
//! each cache load, so an invalidation never lands in the middle of a load
//! that already read the old state.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::info;

use wikisec_core::{GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::cache::SecurityCache;

/// Applies change events to a [`SecurityCache`]
pub struct SecurityCacheRulesInvalidator {
    cache: Arc<SecurityCache>,
    lock: RwLock<()>,
}

impl SecurityCacheRulesInvalidator {
    pub fn new(cache: Arc<SecurityCache>) -> Self {
        Self {
            cache,
            lock: RwLock::new(()),
        }
    }

    /// Holds back invalidations while the guard is alive
    pub fn suspend(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// The rules attached to `reference` were added, edited or removed
    pub fn rules_changed(&self, reference: &SecurityReference) {
        let _guard = self.lock.write();
        let removed = self.cache.remove(reference);
        info!(reference = %reference, removed, "Rules changed");
    }

    /// `member` joined or left `group`
    ///
    /// Both entries go: the group's to drop former members, the member's to
    /// drop what was settled without the new membership.
    pub fn membership_changed(&self, group: &GroupSecurityReference, member: &UserSecurityReference) {
        let _guard = self.lock.write();
        self.cache.remove(group.reference());
        if let Some(document) = member.security_reference() {
            self.cache.remove(document);
        }
        info!(group = %group, member = %member, "Group membership changed");
    }

    /// A document, space or wiki was deleted
    pub fn entity_deleted(&self, reference: &SecurityReference) {
        let _guard = self.lock.write();
        let removed = self.cache.remove(reference);
        info!(reference = %reference, removed, "Entity deleted");
    }

    /// Drops the whole cache
    pub fn invalidate_all(&self) {
        let _guard = self.lock.write();
        self.cache.clear();
    }
}
