//! Collaborator interfaces
//!
//! The engine does not know how rules and group memberships are stored.
//! It reads them through these traits, which every backend implements.
//! All calls are synchronous and may be made from many threads at once.

use wikisec_core::{GroupSecurityReference, SecurityReference, UserSecurityReference};

use crate::error::CollaboratorResult;
use crate::rights::Right;
use crate::rules::SecurityRuleEntry;

/// Supplies the rules defined directly on one reference
pub trait RuleSource: Send + Sync {
    /// Reads the rules attached to `reference` (not inherited ones)
    ///
    /// A reference without rules yields an empty entry, not an error.
    fn read_rules(&self, reference: &SecurityReference) -> CollaboratorResult<SecurityRuleEntry>;
}

/// Answers group membership questions
pub trait GroupMembership: Send + Sync {
    /// Direct groups of `subject` defined in `wiki`
    fn groups_of(
        &self,
        subject: &UserSecurityReference,
        wiki: &SecurityReference,
    ) -> CollaboratorResult<Vec<GroupSecurityReference>>;
}

/// Deployment-wide policy hooks
pub trait DeploymentPolicy: Send + Sync {
    /// Whether the public user is refused `right` outright
    fn needs_authentication(&self, _right: &Right) -> bool {
        false
    }

    /// Whether the wiki currently only accepts read-only rights
    fn is_wiki_read_only(&self) -> bool {
        false
    }
}

/// Policy with every hook at its default
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeploymentPolicy;

impl DeploymentPolicy for DefaultDeploymentPolicy {}
