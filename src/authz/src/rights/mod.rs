//! Rights and the right registry
//!
//! A [`Right`] is an immutable, named permission carrying the policy the
//! settler needs: default state, tie resolution, inheritance override and
//! the entity levels it is meaningful at. Implied-rights edges are owned
//! by the [`RightRegistry`] since registration and unregistration mutate
//! them.

mod graph;
mod registry;

pub use registry::RightRegistry;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use wikisec_core::EntityType;

/// Outcome of a rule or of a settled right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    /// Grant the right
    Allow,
    /// Refuse the right
    Deny,
}

impl RuleState {
    pub fn is_allow(&self) -> bool {
        matches!(self, RuleState::Allow)
    }
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleState::Allow => f.write_str("allow"),
            RuleState::Deny => f.write_str("deny"),
        }
    }
}

/// Stable handle of a registered right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RightId(pub(crate) u32);

/// Everything needed to register a right
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightDescription {
    /// Unique, case-insensitive name
    pub name: String,
    /// State when no rule matches anywhere in the chain
    pub default_state: RuleState,
    /// Winner when allow and deny rules match at the same level
    pub tie_resolution_policy: RuleState,
    /// Whether a more specific level may override a less specific one
    pub inheritance_override_policy: bool,
    /// Names of rights granted together with this one
    #[serde(default)]
    pub implied_rights: BTreeSet<String>,
    /// Levels where the right is meaningful
    #[serde(default)]
    pub targeted_entity_types: BTreeSet<EntityType>,
    /// Stays grantable in read-only mode; also protects from unregistration
    #[serde(default)]
    pub read_only: bool,
}

impl RightDescription {
    /// A description with no implied rights, targeting nothing
    pub fn new(
        name: impl Into<String>,
        default_state: RuleState,
        tie_resolution_policy: RuleState,
        inheritance_override_policy: bool,
    ) -> Self {
        Self {
            name: name.into(),
            default_state,
            tie_resolution_policy,
            inheritance_override_policy,
            implied_rights: BTreeSet::new(),
            targeted_entity_types: BTreeSet::new(),
            read_only: false,
        }
    }

    pub fn implies<I, S>(mut self, rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.implied_rights.extend(rights.into_iter().map(Into::into));
        self
    }

    pub fn targets<I>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = EntityType>,
    {
        self.targeted_entity_types.extend(types);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

#[derive(Debug)]
struct RightInner {
    id: RightId,
    name: String,
    default_state: RuleState,
    tie_resolution_policy: RuleState,
    inheritance_override_policy: bool,
    targeted_entity_types: BTreeSet<EntityType>,
    read_only: bool,
}

/// A registered right
///
/// Identity is the registry handle, so two rights compare equal only if
/// they come from the same registration.
#[derive(Clone)]
pub struct Right(Arc<RightInner>);

impl Right {
    pub(crate) fn from_description(id: RightId, description: &RightDescription) -> Self {
        let mut targets = description.targeted_entity_types.clone();
        // A right enabled for wikis is enabled for the main wiki too
        if targets.contains(&EntityType::Wiki) {
            targets.insert(EntityType::Farm);
        }
        Self(Arc::new(RightInner {
            id,
            name: description.name.clone(),
            default_state: description.default_state,
            tie_resolution_policy: description.tie_resolution_policy,
            inheritance_override_policy: description.inheritance_override_policy,
            targeted_entity_types: targets,
            read_only: description.read_only,
        }))
    }

    pub fn id(&self) -> RightId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn default_state(&self) -> RuleState {
        self.0.default_state
    }

    pub fn tie_resolution_policy(&self) -> RuleState {
        self.0.tie_resolution_policy
    }

    pub fn inheritance_override_policy(&self) -> bool {
        self.0.inheritance_override_policy
    }

    pub fn targeted_entity_types(&self) -> &BTreeSet<EntityType> {
        &self.0.targeted_entity_types
    }

    /// Whether the right is meaningful at the given level
    pub fn is_enabled_for(&self, entity_type: EntityType) -> bool {
        self.0.targeted_entity_types.contains(&entity_type)
    }

    pub fn is_read_only(&self) -> bool {
        self.0.read_only
    }

    /// Whether this is the "not a right" marker
    pub fn is_illegal(&self) -> bool {
        self.0.id == RightId(0)
    }

    /// Checks whether a description would produce an equivalent right
    pub fn like(&self, description: &RightDescription) -> bool {
        self.0.name.eq_ignore_ascii_case(&description.name)
            && self.0.default_state == description.default_state
            && self.0.tie_resolution_policy == description.tie_resolution_policy
            && self.0.inheritance_override_policy == description.inheritance_override_policy
            && self.0.read_only == description.read_only
    }
}

impl PartialEq for Right {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Right {}

impl Hash for Right {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for Right {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Right {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Debug for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Right({}#{})", self.0.name, self.0.id.0)
    }
}

/// An order-irrelevant set of rights
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RightSet(BTreeSet<Right>);

impl RightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, right: Right) -> bool {
        self.0.insert(right)
    }

    pub fn remove(&mut self, right: &Right) -> bool {
        self.0.remove(right)
    }

    pub fn contains(&self, right: &Right) -> bool {
        self.0.contains(right)
    }

    /// ALLOW if the set holds `right`, DENY otherwise
    pub fn state_of(&self, right: &Right) -> RuleState {
        if self.0.contains(right) {
            RuleState::Allow
        } else {
            RuleState::Deny
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Right> {
        self.0.iter()
    }

    /// Names of the rights, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|r| r.name()).collect()
    }
}

impl FromIterator<Right> for RightSet {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Right> for RightSet {
    fn extend<I: IntoIterator<Item = Right>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for RightSet {
    type Item = Right;
    type IntoIter = std::collections::btree_set::IntoIter<Right>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RightSet {
    type Item = &'a Right;
    type IntoIter = std::collections::btree_set::Iter<'a, Right>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The rights every registry starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardRight {
    Login,
    View,
    Edit,
    Delete,
    Creator,
    Register,
    Comment,
    Script,
    Admin,
    CreateWiki,
    Programming,
}

impl StandardRight {
    /// Registration order; also the order of their handles
    pub const ALL: [StandardRight; 11] = [
        StandardRight::Login,
        StandardRight::View,
        StandardRight::Edit,
        StandardRight::Delete,
        StandardRight::Creator,
        StandardRight::Register,
        StandardRight::Comment,
        StandardRight::Script,
        StandardRight::Admin,
        StandardRight::CreateWiki,
        StandardRight::Programming,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StandardRight::Login => "login",
            StandardRight::View => "view",
            StandardRight::Edit => "edit",
            StandardRight::Delete => "delete",
            StandardRight::Creator => "creator",
            StandardRight::Register => "register",
            StandardRight::Comment => "comment",
            StandardRight::Script => "script",
            StandardRight::Admin => "admin",
            StandardRight::CreateWiki => "createwiki",
            StandardRight::Programming => "programming",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }

    /// Built-in definition of this right
    pub fn description(&self) -> RightDescription {
        use EntityType::{Document, Farm, Space, Wiki};
        use RuleState::{Allow, Deny};

        let wsd = [Wiki, Space, Document];
        match self {
            StandardRight::Login => RightDescription::new("login", Allow, Allow, true)
                .targets([Wiki])
                .read_only(true),
            StandardRight::View => RightDescription::new("view", Allow, Deny, true)
                .targets(wsd)
                .read_only(true),
            StandardRight::Edit => RightDescription::new("edit", Allow, Deny, true)
                .implies(["view"])
                .targets(wsd),
            StandardRight::Delete => RightDescription::new("delete", Deny, Deny, true)
                .implies(["view"])
                .targets(wsd),
            StandardRight::Creator => RightDescription::new("creator", Deny, Allow, false)
                .implies(["delete"])
                .targets([Document]),
            StandardRight::Register => {
                RightDescription::new("register", Allow, Allow, true).targets([Wiki])
            }
            StandardRight::Comment => RightDescription::new("comment", Allow, Deny, true).targets(wsd),
            StandardRight::Script => RightDescription::new("script", Deny, Deny, true)
                .targets(wsd)
                .read_only(true),
            StandardRight::Admin => RightDescription::new("admin", Deny, Allow, false)
                .implies(["login", "view", "script", "edit", "delete", "register", "comment"])
                .targets([Wiki, Space])
                .read_only(true),
            StandardRight::CreateWiki => {
                RightDescription::new("createwiki", Deny, Deny, true).targets([Farm])
            }
            StandardRight::Programming => RightDescription::new("programming", Deny, Allow, false)
                .implies([
                    "login", "view", "script", "edit", "delete", "register", "comment", "admin",
                    "createwiki",
                ])
                .targets([Farm])
                .read_only(true),
        }
    }
}

impl fmt::Display for StandardRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the "not a right" marker
pub const ILLEGAL_RIGHT_NAME: &str = "illegal";

pub(crate) fn illegal_description() -> RightDescription {
    RightDescription::new(ILLEGAL_RIGHT_NAME, RuleState::Deny, RuleState::Deny, false)
}
