//! Runtime-extensible right registry

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use wikisec_core::EntityType;

use super::graph::{self, Edges};
use super::{
    illegal_description, Right, RightDescription, RightId, RightSet, StandardRight,
    ILLEGAL_RIGHT_NAME,
};
use crate::error::{AuthzError, Result};

struct RegistryState {
    rights: BTreeMap<RightId, Right>,
    by_name: HashMap<String, RightId>,
    implied: Edges,
    next_id: u32,
}

impl RegistryState {
    fn insert(&mut self, right: Right, implies: BTreeSet<RightId>) {
        self.by_name.insert(right.name().to_lowercase(), right.id());
        self.implied.insert(right.id(), implies);
        self.rights.insert(right.id(), right);
    }

    fn resolve_names(&self, names: &BTreeSet<String>) -> Result<BTreeSet<RightId>> {
        names
            .iter()
            .map(|name| {
                self.by_name
                    .get(&name.to_lowercase())
                    .copied()
                    .ok_or_else(|| AuthzError::InvalidRight(format!("unknown implied right '{}'", name)))
            })
            .collect()
    }

    fn describe_path(&self, path: &[RightId]) -> String {
        path.iter()
            .map(|id| self.rights.get(id).map(|r| r.name().to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Registry of the rights known to one authorization manager
///
/// Starts with the standard rights. Lookups by name are case-insensitive
/// and never fail: unknown names resolve to the ILLEGAL right.
///
/// # Examples
///
/// ```
/// use wikisec_authz::rights::{RightDescription, RightRegistry, RuleState, StandardRight};
///
/// let registry = RightRegistry::new();
/// let publish = registry
///     .register(
///         RightDescription::new("publish", RuleState::Deny, RuleState::Deny, true).implies(["edit"]),
///         &[registry.standard(StandardRight::Admin)],
///     )
///     .unwrap();
///
/// assert_eq!(registry.to_right("PUBLISH"), publish);
/// assert!(registry.to_right("nope").is_illegal());
/// assert!(registry
///     .implied_closure(&registry.standard(StandardRight::Admin))
///     .contains(&publish));
/// ```
pub struct RightRegistry {
    state: RwLock<RegistryState>,
    illegal: Right,
    standard: Vec<Right>,
}

impl RightRegistry {
    /// Creates a registry holding the standard rights
    pub fn new() -> Self {
        let mut state = RegistryState {
            rights: BTreeMap::new(),
            by_name: HashMap::new(),
            implied: Edges::new(),
            next_id: 1,
        };

        let mut standard = Vec::with_capacity(StandardRight::ALL.len());
        for right in StandardRight::ALL {
            let description = right.description();
            let id = RightId(state.next_id);
            state.next_id += 1;

            // Standard rights only imply rights registered before them
            let implies = description
                .implied_rights
                .iter()
                .filter_map(|name| state.by_name.get(name).copied())
                .collect();

            let right = Right::from_description(id, &description);
            state.insert(right.clone(), implies);
            standard.push(right);
        }

        Self {
            state: RwLock::new(state),
            illegal: Right::from_description(RightId(0), &illegal_description()),
            standard,
        }
    }

    /// Registers a right, or returns the existing right of the same name
    ///
    /// The new right is added to the implied set of every right in
    /// `implied_by`.
    ///
    /// # Errors
    ///
    /// - `InvalidRight` for an empty or reserved name, an unknown implied
    ///   right, or an unregistered implying right
    /// - `ImpliedRightsCycle` if the new edges would close a loop
    pub fn register(&self, description: RightDescription, implied_by: &[Right]) -> Result<Right> {
        let name = description.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AuthzError::InvalidRight("right name cannot be empty".into()));
        }
        if name == ILLEGAL_RIGHT_NAME {
            return Err(AuthzError::InvalidRight(format!("'{}' is reserved", ILLEGAL_RIGHT_NAME)));
        }

        let mut state = self.state.write();

        if let Some(existing) = state.by_name.get(&name).and_then(|id| state.rights.get(id)) {
            if !existing.like(&description) {
                warn!(right = %existing, "Right already registered with a different definition");
            }
            return Ok(existing.clone());
        }

        let implies = state.resolve_names(&description.implied_rights)?;
        for right in implied_by {
            if !state.rights.contains_key(&right.id()) {
                return Err(AuthzError::InvalidRight(format!(
                    "implying right '{}' is not registered",
                    right
                )));
            }
        }

        // new → t ⇝ p → new would be a cycle
        for target in &implies {
            for right in implied_by {
                if let Some(path) = graph::find_path(&state.implied, *target, right.id()) {
                    return Err(AuthzError::ImpliedRightsCycle(format!(
                        "{} -> {} -> {}",
                        name,
                        state.describe_path(&path),
                        name
                    )));
                }
            }
        }

        let mut description = description;
        description.name = name;
        if description.targeted_entity_types.is_empty() {
            description.targeted_entity_types.insert(EntityType::Farm);
        }

        let id = RightId(state.next_id);
        state.next_id += 1;
        let right = Right::from_description(id, &description);
        state.insert(right.clone(), implies);
        for implying in implied_by {
            state.implied.entry(implying.id()).or_default().insert(id);
        }

        info!(right = %right, implied_by = implied_by.len(), "Registered right");
        Ok(right)
    }

    /// Removes a right and strips it from every implied set
    ///
    /// Unregistering a right that is no longer registered is a no-op.
    ///
    /// # Errors
    ///
    /// `ProtectedRight` for standard and read-only rights and for ILLEGAL.
    pub fn unregister(&self, right: &Right) -> Result<()> {
        if right.is_illegal() || right.is_read_only() || self.is_standard(right) {
            return Err(AuthzError::ProtectedRight(right.name().to_string()));
        }

        let mut state = self.state.write();
        if state.rights.remove(&right.id()).is_none() {
            debug!(right = %right, "Right already unregistered");
            return Ok(());
        }
        state.by_name.remove(&right.name().to_lowercase());
        state.implied.remove(&right.id());
        for implies in state.implied.values_mut() {
            implies.remove(&right.id());
        }

        info!(right = %right, "Unregistered right");
        Ok(())
    }

    /// Case-insensitive lookup; ILLEGAL on miss
    pub fn to_right(&self, name: &str) -> Right {
        let state = self.state.read();
        state
            .by_name
            .get(&name.trim().to_lowercase())
            .and_then(|id| state.rights.get(id))
            .cloned()
            .unwrap_or_else(|| self.illegal.clone())
    }

    /// The "not a right" marker
    pub fn illegal(&self) -> Right {
        self.illegal.clone()
    }

    /// Handle of a standard right
    pub fn standard(&self, right: StandardRight) -> Right {
        self.standard[right.index()].clone()
    }

    pub fn is_standard(&self, right: &Right) -> bool {
        self.standard.contains(right)
    }

    /// Whether the handle still denotes a registered right
    pub fn contains(&self, right: &Right) -> bool {
        self.state.read().rights.contains_key(&right.id())
    }

    /// All registered rights in registration order
    pub fn values(&self) -> Vec<Right> {
        self.state.read().rights.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().rights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rights directly implied by `right`
    pub fn implied_rights(&self, right: &Right) -> RightSet {
        let state = self.state.read();
        Self::to_set(&state, state.implied.get(&right.id()).into_iter().flatten().copied())
    }

    /// Rights transitively implied by `right`
    pub fn implied_closure(&self, right: &Right) -> RightSet {
        let state = self.state.read();
        Self::to_set(&state, graph::closure(&state.implied, right.id()))
    }

    /// Rights meaningful at the given level
    pub fn enabled_rights(&self, entity_type: EntityType) -> RightSet {
        self.state
            .read()
            .rights
            .values()
            .filter(|r| r.is_enabled_for(entity_type))
            .cloned()
            .collect()
    }

    fn to_set(state: &RegistryState, ids: impl IntoIterator<Item = RightId>) -> RightSet {
        ids.into_iter()
            .filter_map(|id| state.rights.get(&id).cloned())
            .collect()
    }
}

impl Default for RightRegistry {
    fn default() -> Self {
        Self::new()
    }
}
