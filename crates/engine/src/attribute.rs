//! Dynamically typed attribute trees.
//!
//! The host hands every resource its configuration and state as a tree of
//! loosely typed values. Each leaf carries a tri-state [`Presence`]: a null
//! leaf was never written, a zero value was written explicitly, anything else
//! is set. The distinction matters because an explicit zero must reach the API
//! while an absent leaf must not.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Name of the attribute holding the external identifier.
pub const ID_ATTRIBUTE: &str = "id";

/// A single value in an attribute tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttributeValue {
    /// Not written.
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// List or set of values
    List(Vec<AttributeValue>),
    /// Map or nested object
    Map(BTreeMap<String, AttributeValue>),
}

/// Tri-state presence of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Null or never written.
    Absent,
    /// Written with the zero value of its type.
    ExplicitZero,
    /// Written with a non-zero value.
    Set,
}

impl AttributeValue {
    /// Returns the presence of this value.
    #[must_use]
    pub fn presence(&self) -> Presence {
        if self.is_null() {
            Presence::Absent
        } else if self.is_zero() {
            Presence::ExplicitZero
        } else {
            Presence::Set
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for the zero value of the type.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }

    /// Returns the string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric value as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the list items.
    #[must_use]
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map entries.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the value's type, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Converts a JSON value into an attribute value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Float(u as f64)
                } else {
                    n.as_f64().map_or(Self::Null, Self::Float)
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts this value into JSON. Non-finite floats become null.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Follows a path from this value.
    #[must_use]
    pub fn get_path(&self, path: &AttributePath) -> Option<&Self> {
        let mut current = self;
        for step in path.steps() {
            current = match (step, current) {
                (PathStep::Attribute(name) | PathStep::Key(name), Self::Map(map)) => {
                    map.get(name)?
                }
                (PathStep::Index(index), Self::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
            Self::Map(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_json)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(value: Vec<AttributeValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, AttributeValue>> for AttributeValue {
    fn from(value: BTreeMap<String, AttributeValue>) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Named attribute of an object
    Attribute(String),
    /// Position in a list
    Index(usize),
    /// Key in a map
    Key(String),
}

/// Location of a value inside an attribute tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AttributePath(Vec<PathStep>);

impl AttributePath {
    /// The empty path.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path to a top-level attribute.
    #[must_use]
    pub fn attr(name: impl Into<String>) -> Self {
        Self(vec![PathStep::Attribute(name.into())])
    }

    /// Parses a dotted path. Numeric segments are list indexes, so
    /// `scope.0.organization` addresses the first element of the `scope` block.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    segment.parse::<usize>().map_or_else(
                        |_| PathStep::Attribute(segment.to_string()),
                        PathStep::Index,
                    )
                })
                .collect(),
        )
    }

    /// Appends an attribute step.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathStep::Attribute(name.into()));
        self
    }

    /// Appends a list index step.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathStep::Index(index));
        self
    }

    /// Appends a map key step.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathStep::Key(key.into()));
        self
    }

    /// The steps of this path.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Name of the top-level attribute this path starts at.
    #[must_use]
    pub fn root_attribute(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathStep::Attribute(name)) => Some(name),
            _ => None,
        }
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                PathStep::Attribute(name) if i == 0 => write!(f, "{name}")?,
                PathStep::Attribute(name) => write!(f, ".{name}")?,
                PathStep::Index(index) => write!(f, "[{index}]")?,
                PathStep::Key(key) => write!(f, "[{key:?}]")?,
            }
        }
        Ok(())
    }
}

/// A changed value between two trees.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    /// Where the change happened
    pub path: AttributePath,
    /// Value before
    pub before: AttributeValue,
    /// Value after
    pub after: AttributeValue,
}

/// The root object of a resource's configuration or state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTree {
    values: BTreeMap<String, AttributeValue>,
}

static NULL: AttributeValue = AttributeValue::Null;

impl AttributeTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from a JSON object. `null` yields an empty tree.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is neither an object nor null.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match AttributeValue::from_json(value) {
            AttributeValue::Map(values) => Ok(Self { values }),
            AttributeValue::Null => Ok(Self::new()),
            other => Err(Error::codec(
                "<root>",
                format!("expected an object, got {}", other.type_name()),
            )),
        }
    }

    /// Converts the tree into a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Returns the value of an attribute, `Null` when missing.
    #[must_use]
    pub fn get(&self, name: &str) -> &AttributeValue {
        self.values.get(name).unwrap_or(&NULL)
    }

    /// Returns the value at a path.
    #[must_use]
    pub fn get_path(&self, path: &AttributePath) -> Option<&AttributeValue> {
        let (first, rest) = path.steps().split_first()?;
        let PathStep::Attribute(name) = first else {
            return None;
        };
        self.values
            .get(name)?
            .get_path(&AttributePath(rest.to_vec()))
    }

    /// Returns the string value of an attribute.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    /// Returns the non-empty string value of an attribute.
    #[must_use]
    pub fn get_non_empty_str(&self, name: &str) -> Option<&str> {
        self.get_str(name).filter(|s| !s.is_empty())
    }

    /// Returns the boolean value of an attribute.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).as_bool()
    }

    /// Returns the presence of an attribute.
    #[must_use]
    pub fn presence(&self, name: &str) -> Presence {
        self.get(name).presence()
    }

    /// Sets an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Sets the value at a path, creating intermediate objects.
    ///
    /// # Errors
    ///
    /// Returns an error when an intermediate value has the wrong shape or a
    /// list index is out of bounds.
    pub fn set_path(&mut self, path: &AttributePath, value: AttributeValue) -> Result<()> {
        let Some((PathStep::Attribute(first), rest)) = path.steps().split_first() else {
            return Err(Error::codec(path.to_string(), "path must start with an attribute"));
        };
        let mut current = self.values.entry(first.clone()).or_default();
        for step in rest {
            current = match step {
                PathStep::Attribute(name) | PathStep::Key(name) => {
                    if current.is_null() {
                        *current = AttributeValue::Map(BTreeMap::new());
                    }
                    match current {
                        AttributeValue::Map(map) => map.entry(name.clone()).or_default(),
                        other => {
                            return Err(Error::codec(
                                path.to_string(),
                                format!("cannot descend into {}", other.type_name()),
                            ));
                        }
                    }
                }
                PathStep::Index(index) => match current {
                    AttributeValue::List(items) if *index < items.len() => &mut items[*index],
                    _ => {
                        return Err(Error::codec(path.to_string(), "list index out of bounds"));
                    }
                },
            };
        }
        *current = value;
        Ok(())
    }

    /// Removes an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.values.remove(name)
    }

    /// Returns the external identifier.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get_non_empty_str(ID_ATTRIBUTE)
    }

    /// Sets or clears the external identifier.
    pub fn set_id(&mut self, id: Option<&str>) {
        match id {
            Some(id) => self.set(ID_ATTRIBUTE, id),
            None => {
                self.values.insert(ID_ATTRIBUTE.to_string(), AttributeValue::Null);
            }
        }
    }

    /// Iterates over the top-level attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter()
    }

    /// Returns true when no attribute is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.values().all(AttributeValue::is_null)
    }

    /// Borrows the top-level map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, AttributeValue> {
        &self.values
    }

    /// Mutably borrows the top-level map.
    pub fn as_map_mut(&mut self) -> &mut BTreeMap<String, AttributeValue> {
        &mut self.values
    }
}

impl From<BTreeMap<String, AttributeValue>> for AttributeTree {
    fn from(values: BTreeMap<String, AttributeValue>) -> Self {
        Self { values }
    }
}

/// Lists every leaf that differs between two values.
///
/// Lists of different length are reported as a single change at the list's
/// path. Missing keys compare as `Null`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn diff(path: &AttributePath, before: &AttributeValue, after: &AttributeValue) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    match (before, after) {
        (AttributeValue::Map(left), AttributeValue::Map(right)) => {
            let keys: std::collections::BTreeSet<&String> = left.keys().chain(right.keys()).collect();
            for key in keys {
                let child = if path.is_root() {
                    AttributePath::attr(key.clone())
                } else {
                    path.clone().attribute(key.clone())
                };
                changes.extend(diff(
                    &child,
                    left.get(key).unwrap_or(&NULL),
                    right.get(key).unwrap_or(&NULL),
                ));
            }
        }
        (AttributeValue::List(left), AttributeValue::List(right)) => {
            if left.len() == right.len() {
                for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
                    changes.extend(diff(&path.clone().index(i), l, r));
                }
            } else {
                changes.push(AttributeChange {
                    path: path.clone(),
                    before: before.clone(),
                    after: after.clone(),
                });
            }
        }
        (AttributeValue::Int(l), AttributeValue::Float(r))
        | (AttributeValue::Float(r), AttributeValue::Int(l)) => {
            if (*l as f64 - r).abs() > f64::EPSILON {
                changes.push(AttributeChange {
                    path: path.clone(),
                    before: before.clone(),
                    after: after.clone(),
                });
            }
        }
        _ => {
            if before != after {
                changes.push(AttributeChange {
                    path: path.clone(),
                    before: before.clone(),
                    after: after.clone(),
                });
            }
        }
    }

    changes
}

/// Lists every leaf that differs between two trees.
#[must_use]
pub fn diff_trees(before: &AttributeTree, after: &AttributeTree) -> Vec<AttributeChange> {
    diff(
        &AttributePath::root(),
        &AttributeValue::Map(before.values.clone()),
        &AttributeValue::Map(after.values.clone()),
    )
}
