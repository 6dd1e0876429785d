//! Raw entity references and entity levels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Separator between the wiki name and the space path
pub const WIKI_SEPARATOR: char = ':';

/// Separator between nested spaces and the document name
pub const SPACE_SEPARATOR: char = '.';

/// Makes the next character part of a name, even a separator
pub const ESCAPE: char = '\\';

/// `name` in serialized form: separators and escapes are prefixed with [`ESCAPE`]
pub fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, WIKI_SEPARATOR | SPACE_SEPARATOR | ESCAPE) {
            escaped.push(ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Level of an entity in the farm → wiki → space → document hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// The root of the hierarchy; stands for the main wiki
    Farm,
    /// A sub-wiki
    Wiki,
    /// A space, possibly nested in another space
    Space,
    /// A document
    Document,
}

impl EntityType {
    /// All entity types, farm first
    pub const ALL: [EntityType; 4] = [
        EntityType::Farm,
        EntityType::Wiki,
        EntityType::Space,
        EntityType::Document,
    ];

    /// Lowercase name of this level
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Farm => "farm",
            EntityType::Wiki => "wiki",
            EntityType::Space => "space",
            EntityType::Document => "document",
        }
    }

    /// Whether entities of this type act as a wiki (the farm is the main wiki)
    pub fn is_wiki_level(&self) -> bool {
        matches!(self, EntityType::Farm | EntityType::Wiki)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unresolved reference to a wiki entity as callers provide it
///
/// The wiki may be omitted, in which case it resolves to the main wiki.
/// A document always needs at least one enclosing space.
///
/// # Examples
///
/// ```
/// use wikisec_core::{EntityReference, EntityType};
///
/// let doc: EntityReference = "dev:Projects.Rust.Roadmap".parse().unwrap();
/// assert_eq!(doc.wiki.as_deref(), Some("dev"));
/// assert_eq!(doc.spaces, vec!["Projects", "Rust"]);
/// assert_eq!(doc.entity_type(), EntityType::Document);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    /// Wiki name, `None` for the main wiki
    #[serde(default)]
    pub wiki: Option<String>,
    /// Space path, outermost first
    #[serde(default)]
    pub spaces: Vec<String>,
    /// Document name
    #[serde(default)]
    pub document: Option<String>,
}

impl EntityReference {
    /// Reference to a whole wiki
    pub fn wiki(name: impl Into<String>) -> Self {
        Self {
            wiki: Some(name.into()),
            spaces: Vec::new(),
            document: None,
        }
    }

    /// Reference to a (possibly nested) space
    pub fn space<I, S>(wiki: impl Into<String>, spaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wiki: Some(wiki.into()),
            spaces: spaces.into_iter().map(Into::into).collect(),
            document: None,
        }
    }

    /// Reference to a document
    pub fn document<I, S>(wiki: impl Into<String>, spaces: I, name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wiki: Some(wiki.into()),
            spaces: spaces.into_iter().map(Into::into).collect(),
            document: Some(name.into()),
        }
    }

    /// Replace the wiki of this reference
    pub fn with_wiki(mut self, wiki: impl Into<String>) -> Self {
        self.wiki = Some(wiki.into());
        self
    }

    /// The deepest level this reference denotes
    pub fn entity_type(&self) -> EntityType {
        if self.document.is_some() {
            EntityType::Document
        } else if !self.spaces.is_empty() {
            EntityType::Space
        } else {
            EntityType::Wiki
        }
    }

    /// Checks structural validity: no empty names, documents live in a space
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.wiki, Some(w) if w.trim().is_empty()) {
            return Err(CoreError::EmptySegment("wiki"));
        }
        if self.spaces.iter().any(|s| s.is_empty()) {
            return Err(CoreError::EmptySegment("space"));
        }
        match &self.document {
            Some(d) if d.is_empty() => Err(CoreError::EmptySegment("document")),
            Some(_) if self.spaces.is_empty() => Err(CoreError::invalid(
                "a document reference needs at least one space",
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for EntityReference {
    type Err = CoreError;

    /// Parses a document reference of the form `[wiki:]Space[.Sub]*.Page`
    ///
    /// A separator preceded by [`ESCAPE`] belongs to the name.
    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(CoreError::EmptyReference);
        }

        let mut wiki = None;
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(CoreError::invalid(format!("'{}' ends with a lone escape", s)))
                    }
                },
                WIKI_SEPARATOR if wiki.is_none() && segments.is_empty() => {
                    wiki = Some(std::mem::take(&mut current));
                }
                SPACE_SEPARATOR => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);

        if segments.len() < 2 {
            return Err(CoreError::invalid(format!(
                "'{}' is not a document reference (expected Space.Page)",
                s
            )));
        }
        let document = segments.pop();

        let reference = Self {
            wiki,
            spaces: segments,
            document,
        };
        reference.validate()?;
        Ok(reference)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(wiki) = &self.wiki {
            f.write_str(&escape_name(wiki))?;
            if self.spaces.is_empty() {
                return Ok(());
            }
            write!(f, "{}", WIKI_SEPARATOR)?;
        }
        let spaces: Vec<String> = self.spaces.iter().map(|space| escape_name(space)).collect();
        f.write_str(&spaces.join(&SPACE_SEPARATOR.to_string()))?;
        if let Some(document) = &self.document {
            write!(f, "{}{}", SPACE_SEPARATOR, escape_name(document))?;
        }
        Ok(())
    }
}
