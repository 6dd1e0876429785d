//! Security rules and cache entry values
//!
//! Rules are plain data produced by a [`RuleSource`](crate::bridge::RuleSource).
//! The settler only ever asks them three questions: does the rule cover
//! this right, does it name this user, does it name this group.

use std::collections::BTreeSet;

use wikisec_core::{EntityType, GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::rights::{Right, RightSet, RuleState};

/// A subject named by a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleSubject {
    User(UserSecurityReference),
    Group(GroupSecurityReference),
}

/// One access-control entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    rights: RightSet,
    state: RuleState,
    subjects: BTreeSet<RuleSubject>,
    /// Restricts the rule to resources of these types
    entity_types: Option<BTreeSet<EntityType>>,
}

impl SecurityRule {
    pub fn new(rights: RightSet, state: RuleState) -> Self {
        Self {
            rights,
            state,
            subjects: BTreeSet::new(),
            entity_types: None,
        }
    }

    /// Shorthand for an allow rule
    pub fn allow<I: IntoIterator<Item = Right>>(rights: I) -> Self {
        Self::new(rights.into_iter().collect(), RuleState::Allow)
    }

    /// Shorthand for a deny rule
    pub fn deny<I: IntoIterator<Item = Right>>(rights: I) -> Self {
        Self::new(rights.into_iter().collect(), RuleState::Deny)
    }

    pub fn for_user(mut self, user: UserSecurityReference) -> Self {
        self.subjects.insert(RuleSubject::User(user));
        self
    }

    pub fn for_group(mut self, group: GroupSecurityReference) -> Self {
        self.subjects.insert(RuleSubject::Group(group));
        self
    }

    /// Only apply when the resource being checked is of one of these types
    pub fn for_entity_types<I: IntoIterator<Item = EntityType>>(mut self, types: I) -> Self {
        self.entity_types = Some(types.into_iter().collect());
        self
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    pub fn rights(&self) -> &RightSet {
        &self.rights
    }

    pub fn subjects(&self) -> impl Iterator<Item = &RuleSubject> {
        self.subjects.iter()
    }

    /// Whether the rule covers `right`; ILLEGAL is never covered
    pub fn matches_right(&self, right: &Right) -> bool {
        !right.is_illegal() && self.rights.contains(right)
    }

    /// Whether the rule applies to resources of the given type
    pub fn matches_entity_type(&self, entity_type: EntityType) -> bool {
        self.entity_types
            .as_ref()
            .map_or(true, |types| types.contains(&entity_type))
    }

    /// Whether the rule names the subject itself
    pub fn matches_user(&self, user: &UserSecurityReference) -> bool {
        self.subjects.iter().any(|subject| match subject {
            RuleSubject::User(u) => u == user,
            RuleSubject::Group(g) => g.as_user() == user,
        })
    }

    /// Whether the rule names the group
    pub fn matches_group(&self, group: &GroupSecurityReference) -> bool {
        self.subjects
            .iter()
            .any(|subject| matches!(subject, RuleSubject::Group(g) if g == group))
    }
}

/// The rules attached directly to one reference
///
/// Two entries are equal when they concern the same reference and hold the
/// same number of rules, which is how a reload detects that nothing changed.
#[derive(Debug, Clone)]
pub struct SecurityRuleEntry {
    reference: SecurityReference,
    rules: Vec<SecurityRule>,
    owner: Option<UserSecurityReference>,
}

impl SecurityRuleEntry {
    pub fn new(reference: SecurityReference, rules: Vec<SecurityRule>) -> Self {
        Self {
            reference,
            rules,
            owner: None,
        }
    }

    /// An entry without any rule
    pub fn empty(reference: SecurityReference) -> Self {
        Self::new(reference, Vec::new())
    }

    /// Sets the wiki owner; only meaningful on wiki levels
    pub fn with_owner(mut self, owner: UserSecurityReference) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn reference(&self) -> &SecurityReference {
        &self.reference
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn owner(&self) -> Option<&UserSecurityReference> {
        self.owner.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.owner.is_none()
    }
}

impl PartialEq for SecurityRuleEntry {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference && self.rules.len() == other.rules.len()
    }
}

impl Eq for SecurityRuleEntry {}

/// Settled result for one (user, reference) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAccessEntry {
    user: UserSecurityReference,
    reference: SecurityReference,
    allowed: RightSet,
}

impl SecurityAccessEntry {
    pub fn new(user: UserSecurityReference, reference: SecurityReference, allowed: RightSet) -> Self {
        Self {
            user,
            reference,
            allowed,
        }
    }

    pub fn user(&self) -> &UserSecurityReference {
        &self.user
    }

    pub fn reference(&self) -> &SecurityReference {
        &self.reference
    }

    /// Rights allowed to the user on the reference
    pub fn allowed(&self) -> &RightSet {
        &self.allowed
    }

    pub fn get(&self, right: &Right) -> RuleState {
        self.allowed.state_of(right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rights::{RightRegistry, StandardRight};
    use wikisec_core::{EntityReference, SecurityReferenceFactory};

    fn fixture() -> (SecurityReferenceFactory, RightRegistry) {
        (SecurityReferenceFactory::new("xwiki"), RightRegistry::new())
    }

    #[test]
    fn test_rule_matching() {
        let (factory, registry) = fixture();
        let alice = factory.new_user_reference(Some(&"XWiki.Alice".parse().unwrap())).unwrap();
        let bob = factory.new_user_reference(Some(&"XWiki.Bob".parse().unwrap())).unwrap();
        let editors = factory.new_group_reference(&"XWiki.Editors".parse().unwrap()).unwrap();
        let edit = registry.standard(StandardRight::Edit);

        let rule = SecurityRule::allow([edit.clone()])
            .for_user(alice.clone())
            .for_group(editors.clone());

        assert!(rule.matches_right(&edit));
        assert!(!rule.matches_right(&registry.standard(StandardRight::View)));
        assert!(!rule.matches_right(&registry.illegal()));
        assert!(rule.matches_user(&alice));
        assert!(!rule.matches_user(&bob));
        assert!(rule.matches_group(&editors));
        // A group evaluated as a subject is matched directly
        assert!(rule.matches_user(editors.as_user()));
    }

    #[test]
    fn test_entity_type_filter() {
        let (_, registry) = fixture();
        let rule = SecurityRule::deny([registry.standard(StandardRight::Comment)])
            .for_entity_types([EntityType::Document]);
        assert!(rule.matches_entity_type(EntityType::Document));
        assert!(!rule.matches_entity_type(EntityType::Space));
        assert!(SecurityRule::deny(Vec::<Right>::new()).matches_entity_type(EntityType::Space));
    }

    #[test]
    fn test_entry_equality_uses_rule_count() {
        let (factory, registry) = fixture();
        let space = factory
            .new_entity_reference(Some(&EntityReference::space("xwiki", ["Main"])))
            .unwrap();
        let view = registry.standard(StandardRight::View);

        let a = SecurityRuleEntry::new(space.clone(), vec![SecurityRule::allow([view.clone()])]);
        let b = SecurityRuleEntry::new(space.clone(), vec![SecurityRule::deny([view])]);
        assert_eq!(a, b);
        assert_ne!(a, SecurityRuleEntry::empty(space.clone()));
        assert!(SecurityRuleEntry::empty(space).is_empty());
    }
}
