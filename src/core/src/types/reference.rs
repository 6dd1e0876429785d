//! Canonical security references
//!
//! A [`SecurityReference`] is a node in the farm → wiki → space(s) → document
//! hierarchy. Nodes are reference counted and point at their parent, so
//! chains built through the same factory share their wiki and space nodes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::entity::{escape_name, EntityReference, EntityType, SPACE_SEPARATOR, WIKI_SEPARATOR};
use crate::error::{CoreError, Result};

#[derive(Debug)]
struct ReferenceNode {
    entity_type: EntityType,
    name: String,
    parent: Option<SecurityReference>,
    /// Canonical serialized form with escaped names, unique per entity type
    key: String,
    depth: usize,
}

/// A typed, hierarchical reference to a securable entity
///
/// Every reference except the farm has exactly one parent, and the chain up
/// to the farm is finite. Equality is structural; cloning is cheap.
///
/// # Examples
///
/// ```
/// use wikisec_core::{EntityType, SecurityReference};
///
/// let farm = SecurityReference::farm("xwiki");
/// let space = SecurityReference::child(&farm, EntityType::Space, "Main").unwrap();
/// let doc = SecurityReference::child(&space, EntityType::Document, "WebHome").unwrap();
///
/// assert_eq!(doc.to_string(), "xwiki:Main.WebHome");
/// assert_eq!(doc.chain().len(), 3);
/// assert!(farm.is_ancestor_of(&doc));
/// ```
#[derive(Clone)]
pub struct SecurityReference(Arc<ReferenceNode>);

impl SecurityReference {
    /// Creates the farm root, named after the main wiki
    pub fn farm(main_wiki: impl Into<String>) -> Self {
        let name = main_wiki.into();
        Self(Arc::new(ReferenceNode {
            entity_type: EntityType::Farm,
            key: escape_name(&name),
            name,
            parent: None,
            depth: 0,
        }))
    }

    /// Creates a child reference below `parent`
    ///
    /// Wikis hang off the farm, spaces off a wiki level or another space,
    /// and documents off a space.
    pub fn child(parent: &SecurityReference, entity_type: EntityType, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(CoreError::EmptySegment(entity_type.as_str()));
        }

        let escaped = escape_name(name);
        let key = match (parent.entity_type(), entity_type) {
            (EntityType::Farm, EntityType::Wiki) => escaped,
            (EntityType::Farm | EntityType::Wiki, EntityType::Space) => {
                format!("{}{}{}", parent.key(), WIKI_SEPARATOR, escaped)
            }
            (EntityType::Space, EntityType::Space | EntityType::Document) => {
                format!("{}{}{}", parent.key(), SPACE_SEPARATOR, escaped)
            }
            (parent_type, child_type) => {
                return Err(CoreError::invalid(format!(
                    "a {} cannot be placed below a {}",
                    child_type, parent_type
                )))
            }
        };

        Ok(Self(Arc::new(ReferenceNode {
            entity_type,
            name: name.to_string(),
            parent: Some(parent.clone()),
            key,
            depth: parent.depth() + 1,
        })))
    }

    /// Level of this reference
    pub fn entity_type(&self) -> EntityType {
        self.0.entity_type
    }

    /// Local name (wiki, space or document name)
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Canonical serialized form
    pub fn key(&self) -> &str {
        &self.0.key
    }

    /// Parent reference, `None` for the farm
    pub fn parent(&self) -> Option<&SecurityReference> {
        self.0.parent.as_ref()
    }

    /// Distance from the farm (the farm has depth 0)
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn is_farm(&self) -> bool {
        self.0.entity_type == EntityType::Farm
    }

    /// The wiki level this reference belongs to (the farm for the main wiki)
    pub fn wiki(&self) -> SecurityReference {
        let mut current = self;
        while !current.entity_type().is_wiki_level() {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current.clone()
    }

    /// The farm this reference hangs from
    pub fn farm_root(&self) -> SecurityReference {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    /// Whether this reference is in the main wiki
    pub fn is_main_wiki(&self) -> bool {
        self.wiki().is_farm()
    }

    /// The chain from this reference up to the farm, nearest first
    pub fn chain(&self) -> Vec<SecurityReference> {
        let mut chain = Vec::with_capacity(self.depth() + 1);
        let mut current = Some(self);
        while let Some(reference) = current {
            chain.push(reference.clone());
            current = reference.parent();
        }
        chain
    }

    /// Checks whether `other` lies strictly below this reference
    pub fn is_ancestor_of(&self, other: &SecurityReference) -> bool {
        let mut current = other.parent();
        while let Some(reference) = current {
            if reference.depth() < self.depth() {
                return false;
            }
            if reference == self {
                return true;
            }
            current = reference.parent();
        }
        false
    }

    /// Converts back to a raw reference with an explicit wiki name
    pub fn to_entity_reference(&self) -> EntityReference {
        let mut spaces = Vec::new();
        let mut document = None;
        let mut wiki = None;

        for reference in self.chain() {
            match reference.entity_type() {
                EntityType::Document => document = Some(reference.name().to_string()),
                EntityType::Space => spaces.push(reference.name().to_string()),
                EntityType::Wiki | EntityType::Farm => {
                    if wiki.is_none() {
                        wiki = Some(reference.name().to_string());
                    }
                }
            }
        }
        spaces.reverse();

        EntityReference {
            wiki,
            spaces,
            document,
        }
    }
}

impl PartialEq for SecurityReference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.entity_type == other.0.entity_type && self.0.key == other.0.key)
    }
}

impl Eq for SecurityReference {}

impl Hash for SecurityReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.entity_type.hash(state);
        self.0.key.hash(state);
    }
}

impl PartialOrd for SecurityReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecurityReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .key
            .cmp(&other.0.key)
            .then(self.0.entity_type.cmp(&other.0.entity_type))
    }
}

impl fmt::Display for SecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.key)
    }
}

impl fmt::Debug for SecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityReference({} {})", self.0.entity_type, self.0.key)
    }
}
