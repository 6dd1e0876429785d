//! User and group identities

use std::fmt;

use super::entity::EntityType;
use super::reference::SecurityReference;
use crate::error::{CoreError, Result};

/// Reference to a subject: a user, a group, or the public (guest) user
///
/// Users and groups are identified by the document holding their profile.
/// The public user has no document and belongs to the main wiki.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserSecurityReference {
    reference: Option<SecurityReference>,
    wiki: SecurityReference,
    group: bool,
}

impl UserSecurityReference {
    /// Creates a user reference from its profile document
    pub fn new(document: SecurityReference) -> Result<Self> {
        Self::subject(document, false)
    }

    /// The public user of the given farm
    pub fn public(farm: SecurityReference) -> Self {
        Self {
            reference: None,
            wiki: farm.farm_root(),
            group: false,
        }
    }

    fn subject(document: SecurityReference, group: bool) -> Result<Self> {
        if document.entity_type() != EntityType::Document {
            return Err(CoreError::unexpected_type(
                "document",
                document.entity_type().as_str(),
            ));
        }
        Ok(Self {
            wiki: document.wiki(),
            reference: Some(document),
            group,
        })
    }

    /// Profile document, `None` for the public user
    pub fn security_reference(&self) -> Option<&SecurityReference> {
        self.reference.as_ref()
    }

    /// Wiki the subject is defined in (the farm for global subjects)
    pub fn wiki(&self) -> &SecurityReference {
        &self.wiki
    }

    pub fn is_public(&self) -> bool {
        self.reference.is_none()
    }

    /// Whether this subject is defined in the main wiki
    pub fn is_global(&self) -> bool {
        self.wiki.is_farm()
    }

    pub fn is_group(&self) -> bool {
        self.group
    }

    /// The subject as a group reference, if it is a group
    pub fn to_group(&self) -> Option<GroupSecurityReference> {
        if self.group {
            Some(GroupSecurityReference(self.clone()))
        } else {
            None
        }
    }

    /// Document name of the subject, `None` for the public user
    pub fn name(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.name())
    }
}

impl fmt::Display for UserSecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Some(reference) => write!(f, "{}", reference),
            None => f.write_str("<public>"),
        }
    }
}

impl fmt::Debug for UserSecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.group { "Group" } else { "User" };
        write!(f, "{}({})", kind, self)
    }
}

/// Reference to a group, which is also usable as a subject
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupSecurityReference(UserSecurityReference);

impl GroupSecurityReference {
    /// Creates a group reference from its profile document
    pub fn new(document: SecurityReference) -> Result<Self> {
        UserSecurityReference::subject(document, true).map(Self)
    }

    /// Profile document of the group
    pub fn reference(&self) -> &SecurityReference {
        // Groups are always built from a document
        self.0.wiki_document()
    }

    pub fn wiki(&self) -> &SecurityReference {
        self.0.wiki()
    }

    pub fn is_global(&self) -> bool {
        self.0.is_global()
    }

    /// The group seen as a subject
    pub fn as_user(&self) -> &UserSecurityReference {
        &self.0
    }
}

impl UserSecurityReference {
    fn wiki_document(&self) -> &SecurityReference {
        self.reference.as_ref().unwrap_or(&self.wiki)
    }
}

impl From<GroupSecurityReference> for UserSecurityReference {
    fn from(group: GroupSecurityReference) -> Self {
        group.0
    }
}

impl fmt::Display for GroupSecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for GroupSecurityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}
