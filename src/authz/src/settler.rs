//! Authorization settler
//!
//! Turns a rule chain into the set of rights a subject holds on the
//! resource at the head of the chain. Settling is pure: it reads nothing
//! but its arguments and the right registry, and never fails.
//!
//! ## Algorithm, per right
//!
//! 1. Walk the chain nearest-first, skipping levels where the right is not
//!    enabled.
//! 2. At each level, an ALLOW rule counts for the rights it names and every
//!    right they imply, as long as the named right is enabled there; a DENY
//!    rule counts only for the rights it names.
//! 3. Rules naming the subject directly win over rules matched through a
//!    group visible at that level. Allow and deny in the same category
//!    resolve through the right's tie policy.
//! 4. The first decision found stands, except that a right without
//!    inheritance override lets a farm-ward ALLOW replace a nearer DENY.
//! 5. No decision anywhere: the right's default state. Defaults never imply
//!    anything.

use std::collections::BTreeSet;
use std::sync::Arc;

use wikisec_core::{EntityType, GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::rights::{Right, RightRegistry, RightSet, RuleState, StandardRight};
use crate::rules::SecurityRuleEntry;

/// Computes settled rights from a rule chain
pub trait AuthorizationSettler: Send + Sync {
    /// Rights allowed to `user` on the head of `chain`
    ///
    /// `chain` runs from the resource up to the farm; `groups` holds every
    /// group the user belongs to, transitively.
    fn settle(
        &self,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        chain: &[Arc<SecurityRuleEntry>],
    ) -> RightSet;

    /// Outcome for a single right
    fn settle_right(
        &self,
        right: &Right,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        chain: &[Arc<SecurityRuleEntry>],
    ) -> RuleState {
        if right.is_illegal() {
            return RuleState::Deny;
        }
        self.settle(user, groups, chain).state_of(right)
    }
}

/// Settler behaviour switches
#[derive(Debug, Clone, Default)]
pub struct SettlerOptions {
    /// Deny instead of defaulting when other subjects hold an ALLOW rule
    pub exclusive_allow: bool,
    /// The user granted everything regardless of rules
    pub superadmin: Option<UserSecurityReference>,
    /// Rights the superadmin is nevertheless refused
    pub superadmin_excluded_rights: Vec<String>,
}

/// Standard settler
pub struct DefaultAuthorizationSettler {
    registry: Arc<RightRegistry>,
    options: SettlerOptions,
}

#[derive(Debug, Default, Clone, Copy)]
struct Matches {
    allow: bool,
    deny: bool,
}

impl Matches {
    fn record(&mut self, state: RuleState) {
        match state {
            RuleState::Allow => self.allow = true,
            RuleState::Deny => self.deny = true,
        }
    }

    fn decide(&self, tie: RuleState) -> Option<RuleState> {
        match (self.allow, self.deny) {
            (true, true) => Some(tie),
            (true, false) => Some(RuleState::Allow),
            (false, true) => Some(RuleState::Deny),
            (false, false) => None,
        }
    }
}

impl DefaultAuthorizationSettler {
    pub fn new(registry: Arc<RightRegistry>) -> Self {
        Self::with_options(registry, SettlerOptions::default())
    }

    pub fn with_options(registry: Arc<RightRegistry>, options: SettlerOptions) -> Self {
        Self { registry, options }
    }

    fn is_superadmin(&self, user: &UserSecurityReference) -> bool {
        self.options.superadmin.as_ref() == Some(user)
    }

    fn superadmin_rights(&self) -> RightSet {
        let excluded: RightSet = self
            .options
            .superadmin_excluded_rights
            .iter()
            .map(|name| self.registry.to_right(name))
            .collect();
        self.registry
            .values()
            .into_iter()
            .filter(|right| !excluded.contains(right))
            .collect()
    }

    /// `right` itself and every right whose ALLOW implies it
    fn granting(&self, right: &Right) -> RightSet {
        let mut granting: RightSet = self
            .registry
            .values()
            .into_iter()
            .filter(|other| self.registry.implied_closure(other).contains(right))
            .collect();
        granting.insert(right.clone());
        granting
    }

    fn settle_one(
        &self,
        right: &Right,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        chain: &[Arc<SecurityRuleEntry>],
        resource_type: EntityType,
    ) -> RuleState {
        let granting = self.granting(right);
        let mut decision: Option<RuleState> = None;
        let mut allow_seen = false;

        for entry in chain {
            if !right.is_enabled_for(entry.reference().entity_type()) {
                continue;
            }

            let (level, saw_allow) =
                self.settle_level(right, &granting, user, groups, entry, resource_type);
            allow_seen |= saw_allow;

            let Some(state) = level else { continue };
            decision = match decision {
                None => Some(state),
                Some(RuleState::Deny)
                    if state == RuleState::Allow && !right.inheritance_override_policy() =>
                {
                    Some(RuleState::Allow)
                }
                current => current,
            };

            if decision == Some(RuleState::Allow) || right.inheritance_override_policy() {
                break;
            }
        }

        decision.unwrap_or_else(|| {
            if self.options.exclusive_allow && allow_seen {
                RuleState::Deny
            } else {
                right.default_state()
            }
        })
    }

    /// Decision of one level, and whether any ALLOW rule for the right exists there
    fn settle_level(
        &self,
        right: &Right,
        granting: &RightSet,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        entry: &SecurityRuleEntry,
        resource_type: EntityType,
    ) -> (Option<RuleState>, bool) {
        let level_wiki = entry.reference().wiki();
        let level_type = entry.reference().entity_type();
        // Rights meaningless at this level imply nothing here
        let granting: Vec<&Right> = granting
            .iter()
            .filter(|r| r.is_enabled_for(level_type))
            .collect();
        let mut direct = Matches::default();
        let mut indirect = Matches::default();
        let mut saw_allow = false;

        let admin = self.registry.standard(StandardRight::Admin);
        if level_type.is_wiki_level()
            && entry.owner() == Some(user)
            && granting.contains(&&admin)
        {
            direct.record(RuleState::Allow);
        }

        for rule in entry.rules() {
            let covers = match rule.state() {
                RuleState::Allow => granting.iter().any(|r| rule.matches_right(r)),
                RuleState::Deny => rule.matches_right(right),
            };
            if !covers || !rule.matches_entity_type(resource_type) {
                continue;
            }
            if rule.state().is_allow() {
                saw_allow = true;
            }

            if rule.matches_user(user) {
                direct.record(rule.state());
            } else if groups
                .iter()
                .any(|group| is_visible(group, &level_wiki) && rule.matches_group(group))
            {
                indirect.record(rule.state());
            }
        }

        let tie = right.tie_resolution_policy();
        (direct.decide(tie).or_else(|| indirect.decide(tie)), saw_allow)
    }
}

/// Global groups are visible everywhere, local groups only in their wiki
fn is_visible(group: &GroupSecurityReference, level_wiki: &SecurityReference) -> bool {
    group.is_global() || group.wiki() == level_wiki
}

impl AuthorizationSettler for DefaultAuthorizationSettler {
    fn settle(
        &self,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        chain: &[Arc<SecurityRuleEntry>],
    ) -> RightSet {
        if self.is_superadmin(user) {
            return self.superadmin_rights();
        }

        let resource_type = head_type(chain);
        self.registry
            .values()
            .into_iter()
            .filter(|right| {
                self.settle_one(right, user, groups, chain, resource_type) == RuleState::Allow
            })
            .collect()
    }

    fn settle_right(
        &self,
        right: &Right,
        user: &UserSecurityReference,
        groups: &BTreeSet<GroupSecurityReference>,
        chain: &[Arc<SecurityRuleEntry>],
    ) -> RuleState {
        if right.is_illegal() {
            return RuleState::Deny;
        }
        if self.is_superadmin(user) {
            return self.superadmin_rights().state_of(right);
        }
        if !self.registry.contains(right) {
            return right.default_state();
        }
        self.settle_one(right, user, groups, chain, head_type(chain))
    }
}

fn head_type(chain: &[Arc<SecurityRuleEntry>]) -> EntityType {
    chain
        .first()
        .map(|entry| entry.reference().entity_type())
        .unwrap_or(EntityType::Farm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SecurityRule;
    use wikisec_core::{EntityReference, SecurityReferenceFactory};

    struct Fixture {
        factory: SecurityReferenceFactory,
        registry: Arc<RightRegistry>,
        settler: DefaultAuthorizationSettler,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(RightRegistry::new());
            Self {
                factory: SecurityReferenceFactory::new("xwiki"),
                settler: DefaultAuthorizationSettler::new(registry.clone()),
                registry,
            }
        }

        fn right(&self, right: StandardRight) -> Right {
            self.registry.standard(right)
        }

        fn user(&self, name: &str) -> UserSecurityReference {
            self.factory
                .new_user_reference(Some(&EntityReference::document("xwiki", ["XWiki"], name)))
                .unwrap()
        }

        fn group(&self, wiki: &str, name: &str) -> GroupSecurityReference {
            self.factory
                .new_group_reference(&EntityReference::document(wiki, ["XWiki"], name))
                .unwrap()
        }

        /// Chain of `wiki:Space.Page`, nearest first; levels past the given
        /// rule lists get no rules
        fn chain(&self, wiki: &str, levels: [Vec<SecurityRule>; 3]) -> Vec<Arc<SecurityRuleEntry>> {
            let doc = self
                .factory
                .new_entity_reference(Some(&EntityReference::document(wiki, ["Space"], "Page")))
                .unwrap();
            doc.chain()
                .into_iter()
                .enumerate()
                .map(|(i, reference)| {
                    let rules = levels.get(i).cloned().unwrap_or_default();
                    Arc::new(SecurityRuleEntry::new(reference, rules))
                })
                .collect()
        }
    }

    fn no_groups() -> BTreeSet<GroupSecurityReference> {
        BTreeSet::new()
    }

    #[test]
    fn test_defaults_without_rules() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let chain = f.chain("xwiki", [vec![], vec![], vec![]]);
        let allowed = f.settler.settle(&alice, &no_groups(), &chain);

        for right in f.registry.values() {
            assert_eq!(
                allowed.contains(&right),
                right.default_state() == RuleState::Allow,
                "{}",
                right
            );
        }
    }

    #[test]
    fn test_tie_resolution_per_right() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let view = f.right(StandardRight::View);
        let login = f.right(StandardRight::Login);

        // Same level, both states, both naming Alice
        let chain = f.chain(
            "xwiki",
            [
                vec![],
                vec![],
                vec![
                    SecurityRule::allow([view.clone(), login.clone()]).for_user(alice.clone()),
                    SecurityRule::deny([view.clone(), login.clone()]).for_user(alice.clone()),
                ],
            ],
        );
        assert_eq!(f.settler.settle_right(&view, &alice, &no_groups(), &chain), RuleState::Deny);
        assert_eq!(f.settler.settle_right(&login, &alice, &no_groups(), &chain), RuleState::Allow);
    }

    #[test]
    fn test_user_rule_beats_group_rule() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let group = f.group("xwiki", "Readers");
        let view = f.right(StandardRight::View);
        let groups: BTreeSet<_> = [group.clone()].into_iter().collect();

        let chain = f.chain(
            "xwiki",
            [
                vec![
                    SecurityRule::deny([view.clone()]).for_group(group),
                    SecurityRule::allow([view.clone()]).for_user(alice.clone()),
                ],
                vec![],
                vec![],
            ],
        );
        assert_eq!(f.settler.settle_right(&view, &alice, &groups, &chain), RuleState::Allow);
    }

    #[test]
    fn test_override_policy() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let edit = f.right(StandardRight::Edit);
        let admin = f.right(StandardRight::Admin);

        // Document denies, space allows
        let chain = f.chain(
            "xwiki",
            [
                vec![SecurityRule::deny([edit.clone()]).for_user(alice.clone())],
                vec![SecurityRule::allow([edit.clone(), admin.clone()]).for_user(alice.clone())],
                vec![],
            ],
        );
        // edit may be overridden by the nearer level
        assert_eq!(f.settler.settle_right(&edit, &alice, &no_groups(), &chain), RuleState::Deny);

        // Space denies admin, wiki allows it: admin cannot be overridden
        let chain = f.chain(
            "xwiki",
            [
                vec![],
                vec![SecurityRule::deny([admin.clone()]).for_user(alice.clone())],
                vec![SecurityRule::allow([admin.clone()]).for_user(alice.clone())],
            ],
        );
        assert_eq!(f.settler.settle_right(&admin, &alice, &no_groups(), &chain), RuleState::Allow);

        // A farm-ward deny never overrides a nearer allow
        let chain = f.chain(
            "xwiki",
            [
                vec![],
                vec![SecurityRule::allow([admin.clone()]).for_user(alice.clone())],
                vec![SecurityRule::deny([admin.clone()]).for_user(alice.clone())],
            ],
        );
        assert_eq!(f.settler.settle_right(&admin, &alice, &no_groups(), &chain), RuleState::Allow);
    }

    #[test]
    fn test_disabled_level_is_silent() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let admin = f.right(StandardRight::Admin);

        // Admin is not meaningful on documents
        let chain = f.chain(
            "xwiki",
            [vec![SecurityRule::allow([admin.clone()]).for_user(alice.clone())], vec![], vec![]],
        );
        assert_eq!(f.settler.settle_right(&admin, &alice, &no_groups(), &chain), RuleState::Deny);
    }

    #[test]
    fn test_implied_rights_are_granted() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let chain = f.chain(
            "xwiki",
            [
                vec![],
                vec![],
                vec![SecurityRule::allow([f.right(StandardRight::Admin)]).for_user(alice.clone())],
            ],
        );
        let allowed = f.settler.settle(&alice, &no_groups(), &chain);
        assert!(allowed.contains(&f.right(StandardRight::Script)));
        assert!(allowed.contains(&f.right(StandardRight::Delete)));
        assert!(!allowed.contains(&f.right(StandardRight::Programming)));
    }

    #[test]
    fn test_denying_does_not_deny_implied() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let chain = f.chain(
            "xwiki",
            [
                vec![SecurityRule::deny([f.right(StandardRight::Edit)]).for_user(alice.clone())],
                vec![],
                vec![],
            ],
        );
        let allowed = f.settler.settle(&alice, &no_groups(), &chain);
        assert!(!allowed.contains(&f.right(StandardRight::Edit)));
        assert!(allowed.contains(&f.right(StandardRight::View)));
    }

    #[test]
    fn test_default_allow_implies_nothing() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let view = f.right(StandardRight::View);
        let edit = f.right(StandardRight::Edit);
        let chain = f.chain(
            "xwiki",
            [vec![SecurityRule::deny([view.clone()]).for_user(alice.clone())], vec![], vec![]],
        );

        // Edit stays allowed by default but does not bring view back
        assert_eq!(f.settler.settle_right(&edit, &alice, &no_groups(), &chain), RuleState::Allow);
        assert_eq!(f.settler.settle_right(&view, &alice, &no_groups(), &chain), RuleState::Deny);
        let allowed = f.settler.settle(&alice, &no_groups(), &chain);
        assert!(allowed.contains(&edit));
        assert!(!allowed.contains(&view));
    }

    #[test]
    fn test_implied_allow_follows_level_precedence() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let edit = f.right(StandardRight::Edit);
        let admin = f.right(StandardRight::Admin);
        let chain = f.chain(
            "xwiki",
            [
                vec![SecurityRule::deny([edit.clone()]).for_user(alice.clone())],
                vec![SecurityRule::allow([admin.clone()]).for_user(alice.clone())],
                vec![],
            ],
        );

        let allowed = f.settler.settle(&alice, &no_groups(), &chain);
        assert!(allowed.contains(&admin));
        assert!(allowed.contains(&f.right(StandardRight::Delete)));
        assert!(!allowed.contains(&edit));
        assert_eq!(f.settler.settle_right(&edit, &alice, &no_groups(), &chain), RuleState::Deny);
    }

    #[test]
    fn test_implied_allow_against_explicit_deny_on_one_level() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let readers = f.group("xwiki", "Readers");
        let groups: BTreeSet<_> = [readers.clone()].into_iter().collect();
        let view = f.right(StandardRight::View);
        let edit = f.right(StandardRight::Edit);
        let settle = |rules: Vec<SecurityRule>| {
            let chain = f.chain("xwiki", [rules, vec![], vec![]]);
            f.settler.settle_right(&view, &alice, &groups, &chain)
        };

        // Same category: view's tie policy decides
        assert_eq!(
            settle(vec![
                SecurityRule::allow([edit.clone()]).for_user(alice.clone()),
                SecurityRule::deny([view.clone()]).for_user(alice.clone()),
            ]),
            RuleState::Deny
        );
        // Implied allow for the user beats a deny for its group
        assert_eq!(
            settle(vec![
                SecurityRule::allow([edit.clone()]).for_user(alice.clone()),
                SecurityRule::deny([view.clone()]).for_group(readers.clone()),
            ]),
            RuleState::Allow
        );
        // Implied allow for the group loses to a deny for the user
        assert_eq!(
            settle(vec![
                SecurityRule::allow([edit.clone()]).for_group(readers.clone()),
                SecurityRule::deny([view.clone()]).for_user(alice.clone()),
            ]),
            RuleState::Deny
        );
    }

    #[test]
    fn test_rule_for_disabled_right_implies_nothing() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let admin = f.right(StandardRight::Admin);
        let chain = f.chain(
            "xwiki",
            [vec![SecurityRule::allow([admin]).for_user(alice.clone())], vec![], vec![]],
        );

        // Admin means nothing on a document, so neither does what it implies
        let script = f.right(StandardRight::Script);
        assert_eq!(f.settler.settle_right(&script, &alice, &no_groups(), &chain), RuleState::Deny);
    }

    #[test]
    fn test_local_groups_invisible_in_other_wikis() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let foreign = f.group("other", "Editors");
        let script = f.right(StandardRight::Script);
        let groups: BTreeSet<_> = [foreign.clone()].into_iter().collect();

        let chain = f.chain(
            "dev",
            [vec![SecurityRule::allow([script.clone()]).for_group(foreign)], vec![], vec![]],
        );
        assert_eq!(f.settler.settle_right(&script, &alice, &groups, &chain), RuleState::Deny);
    }

    #[test]
    fn test_wiki_owner_is_admin() {
        let f = Fixture::new();
        let alice = f.user("Alice");
        let mut chain = f.chain("dev", [vec![], vec![], vec![]]);
        let wiki = chain[2].reference().clone();
        chain[2] = Arc::new(SecurityRuleEntry::empty(wiki).with_owner(alice.clone()));

        let allowed = f.settler.settle(&alice, &no_groups(), &chain);
        assert!(allowed.contains(&f.right(StandardRight::Admin)));
        assert!(!allowed.contains(&f.right(StandardRight::Programming)));
    }

    #[test]
    fn test_exclusive_allow() {
        let registry = Arc::new(RightRegistry::new());
        let settler = DefaultAuthorizationSettler::with_options(
            registry.clone(),
            SettlerOptions {
                exclusive_allow: true,
                ..Default::default()
            },
        );
        let f = Fixture::new();
        let view = registry.standard(StandardRight::View);
        let chain = f.chain(
            "xwiki",
            [vec![SecurityRule::allow([view.clone()]).for_user(f.user("Bob"))], vec![], vec![]],
        );

        let alice = f.user("Alice");
        assert_eq!(settler.settle_right(&view, &alice, &no_groups(), &chain), RuleState::Deny);
        // Without the switch, Alice falls back to the default
        assert_eq!(f.settler.settle_right(&view, &alice, &no_groups(), &chain), RuleState::Allow);
    }

    #[test]
    fn test_superadmin_and_illegal() {
        let registry = Arc::new(RightRegistry::new());
        let f = Fixture::new();
        let root = f.user("superadmin");
        let settler = DefaultAuthorizationSettler::with_options(
            registry.clone(),
            SettlerOptions {
                superadmin: Some(root.clone()),
                superadmin_excluded_rights: vec!["programming".into()],
                ..Default::default()
            },
        );
        let chain = f.chain(
            "xwiki",
            [
                vec![SecurityRule::deny([registry.standard(StandardRight::View)]).for_user(root.clone())],
                vec![],
                vec![],
            ],
        );

        let allowed = settler.settle(&root, &no_groups(), &chain);
        assert!(allowed.contains(&registry.standard(StandardRight::View)));
        assert!(allowed.contains(&registry.standard(StandardRight::Admin)));
        assert!(!allowed.contains(&registry.standard(StandardRight::Programming)));
        assert_eq!(
            settler.settle_right(&registry.illegal(), &root, &no_groups(), &chain),
            RuleState::Deny
        );
    }
}
