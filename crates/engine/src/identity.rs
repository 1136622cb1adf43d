//! External identifiers and import handles.

use std::fmt;

use uuid::Uuid;

use crate::attribute::AttributeTree;
use crate::error::{Error, Result};

/// Separator between the segments of a composite import handle.
pub const IMPORT_SEPARATOR: char = '/';

/// How a resource type obtains its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// The create response carries the server UUID.
    ServerUuid,
    /// The create response carries no identifier; a paged search by name
    /// adopts the UUID.
    SearchByName,
    /// The server keys the object by its name.
    NameKey,
}

/// Structured identifier of a remote object.
///
/// `primary` is what the host persists as `id`; `parents` are the keys of the
/// enclosing objects, in path order, and live in regular attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    primary: String,
    parents: Vec<String>,
}

impl ResourceId {
    /// Identifier without parents.
    #[must_use]
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            parents: Vec::new(),
        }
    }

    /// Identifier nested under parents.
    #[must_use]
    pub fn with_parents(primary: impl Into<String>, parents: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            parents,
        }
    }

    /// Builds the identifier of a persisted tree.
    ///
    /// `None` when the tree has no `id` or a parent attribute is unset.
    #[must_use]
    pub fn from_tree(tree: &AttributeTree, parent_attributes: &[&str]) -> Option<Self> {
        let primary = tree.id()?;
        let parents = parent_attributes
            .iter()
            .map(|name| tree.get_non_empty_str(name).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(Self::with_parents(primary, parents))
    }

    /// The key the host persists.
    #[must_use]
    pub fn display_id(&self) -> &str {
        &self.primary
    }

    /// Keys of the enclosing objects.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// Key of the enclosing object at `index`.
    #[must_use]
    pub fn parent(&self, index: usize) -> Option<&str> {
        self.parents.get(index).map(String::as_str)
    }

    /// Writes the identifier and parent attributes into a tree.
    pub fn write_to(&self, tree: &mut AttributeTree, parent_attributes: &[&str]) {
        tree.set_id(Some(&self.primary));
        for (name, value) in parent_attributes.iter().zip(&self.parents) {
            tree.set(*name, value.as_str());
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for parent in &self.parents {
            write!(f, "{parent}{IMPORT_SEPARATOR}")?;
        }
        f.write_str(&self.primary)
    }
}

/// Last segment of an import handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKey {
    /// A server UUID.
    Uuid(Uuid),
    /// A name (or another natural key) to search for.
    Name(String),
}

impl ImportKey {
    /// The key as text.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Uuid(uuid) => uuid.to_string(),
            Self::Name(name) => name.clone(),
        }
    }
}

/// A parsed import handle: `<parent>/.../<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportHandle {
    /// Parent keys, in path order
    pub parents: Vec<String>,
    /// Object key
    pub key: ImportKey,
}

impl ImportHandle {
    /// Parses a handle for a type with the given parent attributes.
    ///
    /// # Errors
    ///
    /// Returns an error when the segment count does not match or a segment is
    /// empty.
    pub fn parse(handle: &str, parent_attributes: &[&str]) -> Result<Self> {
        let trimmed = handle.trim();
        let expected = parent_attributes
            .iter()
            .map(|name| format!("<{name}>"))
            .chain(std::iter::once("<id or name>".to_string()))
            .collect::<Vec<_>>()
            .join(&IMPORT_SEPARATOR.to_string());

        let invalid = |message: String| Error::InvalidImportHandle {
            handle: handle.to_string(),
            message,
        };

        if trimmed.is_empty() {
            return Err(invalid(format!("expected {expected}")));
        }

        let segments: Vec<&str> = trimmed
            .splitn(parent_attributes.len() + 1, IMPORT_SEPARATOR)
            .collect();
        if segments.len() != parent_attributes.len() + 1 || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid(format!("expected {expected}")));
        }

        let (key, parents) = segments
            .split_last()
            .ok_or_else(|| invalid(format!("expected {expected}")))?;
        if parent_attributes.is_empty() && key.contains(IMPORT_SEPARATOR) {
            return Err(invalid(format!("expected {expected}")));
        }

        let key = Uuid::parse_str(key).map_or_else(|_| ImportKey::Name((*key).to_string()), ImportKey::Uuid);

        Ok(Self {
            parents: parents.iter().map(|s| (*s).to_string()).collect(),
            key,
        })
    }
}
