//! Cache keys and arena nodes

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use wikisec_core::{GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::rules::{SecurityAccessEntry, SecurityRuleEntry};

/// Arena handle of a cached entry
pub(crate) type EntryId = u64;

/// Slot of an entry in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    /// Rules of a reference; a user or group profile shares its document's slot
    Rules(SecurityReference),
    /// Settled access of a user on a reference
    Access(UserSecurityReference, SecurityReference),
    /// A global subject mirrored into a sub-wiki: (profile document, wiki)
    Shadow(SecurityReference, SecurityReference),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Rules(reference) => write!(f, "{}", reference),
            CacheKey::Access(user, reference) => write!(f, "{}@@{}", user, reference),
            CacheKey::Shadow(subject, wiki) => write!(f, "{}@@{}", wiki, subject),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CachedValue {
    Rules {
        entry: Arc<SecurityRuleEntry>,
        /// Set once the document is known to hold a user or group profile
        subject: Option<UserSecurityReference>,
    },
    Access(Arc<SecurityAccessEntry>),
    Shadow {
        subject: UserSecurityReference,
        wiki: SecurityReference,
    },
}

#[derive(Debug)]
pub(crate) struct CacheNode {
    pub key: CacheKey,
    pub value: CachedValue,
    /// Entries this one was derived from
    pub parents: Vec<EntryId>,
    /// Entries derived from this one
    pub children: BTreeSet<EntryId>,
}

impl CacheNode {
    pub fn new(key: CacheKey, value: CachedValue, parents: Vec<EntryId>) -> Self {
        Self {
            key,
            value,
            parents,
            children: BTreeSet::new(),
        }
    }

    /// Whether the node stands for a user or group (profile or shadow)
    pub fn is_subject(&self) -> bool {
        matches!(
            self.value,
            CachedValue::Rules { subject: Some(_), .. } | CachedValue::Shadow { .. }
        )
    }

    /// The group this node stands for, if any
    pub fn group(&self) -> Option<GroupSecurityReference> {
        match &self.value {
            CachedValue::Rules {
                subject: Some(subject),
                ..
            }
            | CachedValue::Shadow { subject, .. } => subject.to_group(),
            _ => None,
        }
    }

    pub fn add_parent(&mut self, parent: EntryId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }
}
