//! Declarative resource schemas.
//!
//! Schemas are data: each resource describes its attributes with a small
//! builder DSL and the engine derives validation, defaults, replacement paths
//! and change detection from that description.
//!
//! ```ignore
//! let schema = Schema::v0()
//!     .with_attribute("cluster_id", Attribute::required_string().force_new().validate(Validator::Uuid))
//!     .with_attribute("name", Attribute::required_string().force_new())
//!     .with_attribute("is_enabled", Attribute::optional_bool().with_default(true));
//! ```

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::json;

use crate::attribute::{
    AttributeChange, AttributePath, AttributeTree, AttributeValue, ID_ATTRIBUTE, PathStep,
    diff_trees,
};
use crate::error::Error;

/// How an attribute is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Must be set by the user.
    Required,
    /// May be set by the user.
    Optional,
    /// Set by the server only.
    Computed,
    /// May be set by the user, otherwise filled by the server.
    OptionalComputed,
}

/// Value type of an attribute.
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// 64-bit integer
    Int,
    /// Floating point number
    Float,
    /// Boolean
    Bool,
    /// Ordered list of values
    List(Box<AttributeType>),
    /// Unordered set of values
    Set(Box<AttributeType>),
    /// Map of string keys to values
    Map(Box<AttributeType>),
    /// Nested block, stored as a list of objects
    Block {
        /// Schema of each element
        schema: Box<Schema>,
        /// Maximum element count (`Some(1)` for single-item blocks)
        max_items: Option<usize>,
        /// Minimum element count
        min_items: usize,
    },
}

impl AttributeType {
    fn type_json(&self) -> serde_json::Value {
        match self {
            Self::String => json!("string"),
            Self::Int | Self::Float => json!("number"),
            Self::Bool => json!("bool"),
            Self::List(elem) => json!(["list", elem.type_json()]),
            Self::Set(elem) => json!(["set", elem.type_json()]),
            Self::Map(elem) => json!(["map", elem.type_json()]),
            Self::Block { schema, .. } => schema.to_json(),
        }
    }

    /// Returns true when the value has this type.
    #[must_use]
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        match (self, value) {
            (_, AttributeValue::Null)
            | (Self::String, AttributeValue::String(_))
            | (Self::Bool, AttributeValue::Bool(_))
            | (Self::Int, AttributeValue::Int(_))
            | (Self::Float, AttributeValue::Int(_) | AttributeValue::Float(_)) => true,
            (Self::Int, AttributeValue::Float(f)) => f.fract() == 0.0,
            (Self::List(elem) | Self::Set(elem), AttributeValue::List(items)) => {
                items.iter().all(|item| elem.accepts(item))
            }
            (Self::Map(elem), AttributeValue::Map(map)) => map.values().all(|v| elem.accepts(v)),
            (Self::Block { .. }, AttributeValue::List(items)) => {
                items.iter().all(|item| matches!(item, AttributeValue::Map(_)))
            }
            _ => false,
        }
    }
}

/// Declarative value check.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Value must be one of the listed strings.
    OneOf(&'static [&'static str]),
    /// Value must match the pattern.
    Pattern(Regex),
    /// Value must be a UUID.
    Uuid,
    /// Integer value must be in the inclusive range.
    IntRange {
        /// Lower bound
        min: i64,
        /// Upper bound
        max: i64,
    },
    /// String or list must not be empty.
    NotEmpty,
    /// Value must be a JSON document.
    Json,
    /// Value must be an RFC 3339 timestamp.
    Rfc3339,
}

impl Validator {
    /// Checks a value. List values are checked element by element.
    ///
    /// # Errors
    ///
    /// Returns a message describing the violation.
    pub fn check(&self, value: &AttributeValue) -> Result<(), String> {
        if let (AttributeValue::List(items), false) = (value, matches!(self, Self::NotEmpty)) {
            return items.iter().try_for_each(|item| self.check(item));
        }
        match (self, value) {
            (_, AttributeValue::Null) => Ok(()),
            (Self::OneOf(allowed), AttributeValue::String(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("expected one of {}, got \"{s}\"", allowed.join(", ")))
                }
            }
            (Self::Pattern(re), AttributeValue::String(s)) => {
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("\"{s}\" does not match {}", re.as_str()))
                }
            }
            (Self::Uuid, AttributeValue::String(s)) => uuid::Uuid::parse_str(s)
                .map(|_| ())
                .map_err(|_| format!("\"{s}\" is not a valid UUID")),
            (Self::IntRange { min, max }, AttributeValue::Int(i)) => {
                if (*min..=*max).contains(i) {
                    Ok(())
                } else {
                    Err(format!("{i} is outside the range {min}..={max}"))
                }
            }
            (Self::NotEmpty, v) => {
                if v.is_zero() {
                    Err("must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            (Self::Json, AttributeValue::String(s)) => serde_json::from_str::<serde_json::Value>(s)
                .map(|_| ())
                .map_err(|e| format!("invalid JSON: {e}")),
            (Self::Rfc3339, AttributeValue::String(s)) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| ())
                .map_err(|e| format!("\"{s}\" is not an RFC 3339 timestamp: {e}")),
            (_, other) => Err(format!("validator does not apply to {}", other.type_name())),
        }
    }
}

/// One attribute of a schema.
#[derive(Debug, Clone)]
pub struct Attribute {
    /// Value type
    pub attr_type: AttributeType,
    /// How the value is supplied
    pub mode: Mode,
    /// Changing the value replaces the resource
    pub force_new: bool,
    /// Value is hidden from plan output
    pub sensitive: bool,
    /// Default applied at plan time when the user leaves it unset
    pub default: Option<AttributeValue>,
    /// User facing description
    pub description: String,
    /// Value checks
    pub validators: Vec<Validator>,
    /// Deprecation message, when the attribute is deprecated
    pub deprecated: Option<String>,
}

impl Attribute {
    /// Creates an attribute of the given type and mode.
    #[must_use]
    pub fn new(attr_type: AttributeType, mode: Mode) -> Self {
        Self {
            attr_type,
            mode,
            force_new: false,
            sensitive: false,
            default: None,
            description: String::new(),
            validators: Vec::new(),
            deprecated: None,
        }
    }

    /// Required string.
    #[must_use]
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, Mode::Required)
    }

    /// Optional string.
    #[must_use]
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, Mode::Optional)
    }

    /// Server-set string.
    #[must_use]
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, Mode::Computed)
    }

    /// Required integer.
    #[must_use]
    pub fn required_int() -> Self {
        Self::new(AttributeType::Int, Mode::Required)
    }

    /// Optional integer.
    #[must_use]
    pub fn optional_int() -> Self {
        Self::new(AttributeType::Int, Mode::Optional)
    }

    /// Optional float.
    #[must_use]
    pub fn optional_float() -> Self {
        Self::new(AttributeType::Float, Mode::Optional)
    }

    /// Optional boolean.
    #[must_use]
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, Mode::Optional)
    }

    /// Server-set boolean.
    #[must_use]
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, Mode::Computed)
    }

    /// Optional list of strings.
    #[must_use]
    pub fn optional_string_list() -> Self {
        Self::new(AttributeType::List(Box::new(AttributeType::String)), Mode::Optional)
    }

    /// Optional set of strings.
    #[must_use]
    pub fn optional_string_set() -> Self {
        Self::new(AttributeType::Set(Box::new(AttributeType::String)), Mode::Optional)
    }

    /// Optional map of strings.
    #[must_use]
    pub fn optional_string_map() -> Self {
        Self::new(AttributeType::Map(Box::new(AttributeType::String)), Mode::Optional)
    }

    /// Repeated nested block.
    #[must_use]
    pub fn block_list(schema: Schema, mode: Mode) -> Self {
        Self::new(
            AttributeType::Block {
                schema: Box::new(schema),
                max_items: None,
                min_items: usize::from(mode == Mode::Required),
            },
            mode,
        )
    }

    /// Nested block with at most one element.
    #[must_use]
    pub fn single_block(schema: Schema, mode: Mode) -> Self {
        Self::new(
            AttributeType::Block {
                schema: Box::new(schema),
                max_items: Some(1),
                min_items: usize::from(mode == Mode::Required),
            },
            mode,
        )
    }

    /// Marks the attribute as replacing the resource when changed.
    #[must_use]
    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Marks the attribute as sensitive.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Lets the server fill the attribute when the user leaves it unset.
    #[must_use]
    pub fn computed(mut self) -> Self {
        if self.mode == Mode::Optional {
            self.mode = Mode::OptionalComputed;
        }
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Marks the attribute as deprecated.
    #[must_use]
    pub fn deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    /// Returns true for single-item blocks.
    #[must_use]
    pub fn is_single_block(&self) -> bool {
        matches!(
            self.attr_type,
            AttributeType::Block {
                max_items: Some(1),
                ..
            }
        )
    }

    /// Nested schema of a block attribute.
    #[must_use]
    pub fn block_schema(&self) -> Option<&Schema> {
        match &self.attr_type {
            AttributeType::Block { schema, .. } => Some(schema),
            _ => None,
        }
    }

    fn to_json(&self, name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "type": self.attr_type.type_json(),
            "required": self.mode == Mode::Required,
            "optional": matches!(self.mode, Mode::Optional | Mode::OptionalComputed),
            "computed": matches!(self.mode, Mode::Computed | Mode::OptionalComputed),
            "sensitive": self.sensitive,
            "force_new": self.force_new,
            "description": self.description,
            "deprecated": self.deprecated.is_some(),
        })
    }
}

/// Schema of a resource or of a nested block.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// State schema version
    pub version: i64,
    /// User facing description
    pub description: String,
    /// Attributes by name
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    /// Creates an empty version 0 schema.
    #[must_use]
    pub fn v0() -> Self {
        Self::default()
    }

    /// Sets the state schema version.
    #[must_use]
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Adds the computed `id` attribute unless one is declared.
    #[must_use]
    pub fn with_id(mut self) -> Self {
        self.attributes
            .entry(ID_ATTRIBUTE.to_string())
            .or_insert_with(|| {
                Attribute::computed_string().describe("Identifier of the remote object")
            });
        self
    }

    /// Looks up a top-level attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Resolves the attribute a path points into.
    #[must_use]
    pub fn attribute_at(&self, path: &AttributePath) -> Option<&Attribute> {
        let mut schema = self;
        let mut found = None;
        for step in path.steps() {
            match step {
                PathStep::Attribute(name) => {
                    let attribute = schema.attributes.get(name)?;
                    found = Some(attribute);
                    if let Some(nested) = attribute.block_schema() {
                        schema = nested;
                    }
                }
                PathStep::Index(_) | PathStep::Key(_) => {}
            }
        }
        found
    }

    /// Validates a tree: required attributes, types, validators and block sizes.
    ///
    /// Returns every violation found.
    #[must_use]
    pub fn validate(&self, tree: &AttributeTree) -> Vec<Error> {
        let mut errors = Vec::new();
        self.validate_map(tree.as_map(), &AttributePath::root(), &mut errors);
        errors
    }

    fn validate_map(
        &self,
        map: &BTreeMap<String, AttributeValue>,
        base: &AttributePath,
        errors: &mut Vec<Error>,
    ) {
        for (name, attribute) in &self.attributes {
            let path = if base.is_root() {
                AttributePath::attr(name.clone())
            } else {
                base.clone().attribute(name.clone())
            };
            let value = map.get(name).unwrap_or(&AttributeValue::Null);

            if value.is_null() {
                if attribute.mode == Mode::Required {
                    errors.push(Error::config_invalid_at(
                        path.clone(),
                        format!("the argument \"{path}\" is required, but no definition was found"),
                    ));
                }
                continue;
            }

            if !attribute.attr_type.accepts(value) {
                errors.push(Error::config_invalid_at(
                    path.clone(),
                    format!("{path}: unexpected {} value", value.type_name()),
                ));
                continue;
            }

            for validator in &attribute.validators {
                if let Err(message) = validator.check(value) {
                    errors.push(Error::config_invalid_at(path.clone(), format!("{path}: {message}")));
                }
            }

            if let AttributeType::Block {
                schema,
                max_items,
                min_items,
            } = &attribute.attr_type
            {
                let items = value.as_list().unwrap_or_default();
                if let Some(max) = max_items
                    && items.len() > *max
                {
                    errors.push(Error::config_invalid_at(
                        path.clone(),
                        format!("{path}: at most {max} block(s) allowed, got {}", items.len()),
                    ));
                }
                if items.len() < *min_items {
                    errors.push(Error::config_invalid_at(
                        path.clone(),
                        format!("{path}: at least {min_items} block(s) required"),
                    ));
                }
                for (i, item) in items.iter().enumerate() {
                    if let Some(element) = item.as_map() {
                        schema.validate_map(element, &path.clone().index(i), errors);
                    }
                }
            }
        }
    }

    /// Fills unset attributes that declare a default, including inside blocks.
    pub fn apply_defaults(&self, tree: &mut AttributeTree) {
        self.apply_defaults_map(tree.as_map_mut());
    }

    fn apply_defaults_map(&self, map: &mut BTreeMap<String, AttributeValue>) {
        for (name, attribute) in &self.attributes {
            let value = map.entry(name.clone()).or_default();
            if value.is_null() {
                if let Some(default) = &attribute.default {
                    *value = default.clone();
                }
                continue;
            }
            if let (Some(nested), AttributeValue::List(items)) = (attribute.block_schema(), value) {
                for item in items.iter_mut() {
                    if let AttributeValue::Map(element) = item {
                        nested.apply_defaults_map(element);
                    }
                }
            }
        }
    }

    /// Copies server-set values from the prior state into a planned tree.
    ///
    /// Computed attributes always take the prior value; optional-computed
    /// attributes take it only when the user left them unset.
    pub fn carry_computed(&self, prior: &AttributeTree, planned: &mut AttributeTree) {
        for (name, attribute) in &self.attributes {
            let prior_value = prior.get(name);
            match attribute.mode {
                Mode::Computed => planned.set(name.clone(), prior_value.clone()),
                Mode::OptionalComputed if planned.get(name).is_null() => {
                    planned.set(name.clone(), prior_value.clone());
                }
                _ => {}
            }
        }
    }

    /// Lists force-new attributes whose value differs between two trees.
    #[must_use]
    pub fn replace_paths(&self, prior: &AttributeTree, planned: &AttributeTree) -> Vec<AttributePath> {
        let mut paths: Vec<AttributePath> = self
            .user_changes(prior, planned)
            .into_iter()
            .filter_map(|change| {
                let attribute = self.attribute_at(&change.path)?;
                attribute.force_new.then(|| truncate_to_attribute(&change.path))
            })
            .collect();
        paths.dedup();
        paths
    }

    /// Lists changes to attributes the user controls. Computed-only
    /// attributes and attributes outside the schema are ignored.
    #[must_use]
    pub fn user_changes(&self, prior: &AttributeTree, planned: &AttributeTree) -> Vec<AttributeChange> {
        diff_trees(prior, planned)
            .into_iter()
            .filter(|change| {
                self.attribute_at(&change.path)
                    .is_some_and(|attribute| attribute.mode != Mode::Computed)
            })
            .collect()
    }

    /// Host-facing description of the schema.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let (blocks, attributes): (Vec<_>, Vec<_>) = self
            .attributes
            .iter()
            .partition(|(_, attribute)| attribute.block_schema().is_some());

        let block_types: Vec<serde_json::Value> = blocks
            .into_iter()
            .filter_map(|(name, attribute)| match &attribute.attr_type {
                AttributeType::Block {
                    schema,
                    max_items,
                    min_items,
                } => Some(json!({
                    "type_name": name,
                    "nesting": if *max_items == Some(1) { "single" } else { "list" },
                    "min_items": min_items,
                    "max_items": max_items,
                    "block": schema.to_json(),
                })),
                _ => None,
            })
            .collect();

        json!({
            "version": self.version,
            "description": self.description,
            "attributes": attributes
                .into_iter()
                .map(|(name, attribute)| attribute.to_json(name))
                .collect::<Vec<_>>(),
            "block_types": block_types,
        })
    }
}

/// Cuts a leaf path back to the deepest named attribute.
fn truncate_to_attribute(path: &AttributePath) -> AttributePath {
    let steps = path.steps();
    let end = steps
        .iter()
        .rposition(|step| matches!(step, PathStep::Attribute(_)))
        .map_or(0, |i| i + 1);
    steps[..end]
        .iter()
        .fold(AttributePath::root(), |acc, step| match step {
            PathStep::Attribute(name) if acc.is_root() => AttributePath::attr(name.clone()),
            PathStep::Attribute(name) => acc.attribute(name.clone()),
            PathStep::Index(i) => acc.index(*i),
            PathStep::Key(k) => acc.key(k.clone()),
        })
}
