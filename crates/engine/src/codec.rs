//! Attribute codec: attribute trees to typed records and back.
//!
//! Decoding projects a tree into JSON following the schema and the tri-state
//! presence of every leaf, then hands the JSON to serde. Encoding goes the
//! other way and merges a typed response record into the prior tree so that
//! fields the API does not echo (credentials, user-only settings) survive.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::attribute::{AttributeTree, AttributeValue, Presence};
use crate::error::{Error, Result};
use crate::schema::{Attribute, AttributeType, Mode, Schema};

/// How explicit zero values of optional leaves are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroMode {
    /// Explicit zeros are emitted.
    #[default]
    IncludeZeros,
    /// Explicit zeros are dropped, for endpoints where zero means "don't send".
    OmitZeros,
}

/// Naming convention of record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldCase {
    /// Record fields use the attribute names.
    #[default]
    Snake,
    /// Record fields use lower camel case (`min_cpu` is `minCpu`).
    Camel,
}

impl FieldCase {
    fn record_name(self, attribute: &str) -> String {
        match self {
            Self::Snake => attribute.to_string(),
            Self::Camel => snake_to_camel(attribute),
        }
    }

    fn attribute_name(self, field: &str) -> String {
        match self {
            Self::Snake => field.to_string(),
            Self::Camel => camel_to_snake(field),
        }
    }
}

fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Treatment of explicit zeros
    pub zero_mode: ZeroMode,
    /// Single-item blocks decode to an object instead of a one element list
    pub unwrap_single_item_list: bool,
    /// Naming convention of record fields
    pub field_case: FieldCase,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            zero_mode: ZeroMode::IncludeZeros,
            unwrap_single_item_list: true,
            field_case: FieldCase::Snake,
        }
    }
}

impl CodecOptions {
    /// Options for request bodies where zero values must not be sent.
    #[must_use]
    pub fn sparse() -> Self {
        Self {
            zero_mode: ZeroMode::OmitZeros,
            ..Self::default()
        }
    }

    /// Options for API records with camel case fields.
    #[must_use]
    pub fn camel() -> Self {
        Self {
            field_case: FieldCase::Camel,
            ..Self::default()
        }
    }

    /// Switches the field naming convention.
    #[must_use]
    pub fn with_field_case(mut self, field_case: FieldCase) -> Self {
        self.field_case = field_case;
        self
    }
}

/// Schema-driven converter between attribute trees and typed records.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'a> {
    schema: &'a Schema,
    options: CodecOptions,
}

impl<'a> Codec<'a> {
    /// Creates a codec with default options.
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            options: CodecOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Projects a tree to JSON.
    ///
    /// Required leaves are always emitted. Optional leaves are emitted when
    /// set, and when explicitly zero unless the zero mode omits them. Absent
    /// leaves and attributes outside the schema are never emitted.
    #[must_use]
    pub fn project(&self, tree: &AttributeTree) -> serde_json::Value {
        serde_json::Value::Object(self.project_map(self.schema, tree.as_map()))
    }

    /// Decodes a tree into a typed record.
    ///
    /// # Errors
    ///
    /// Returns a codec error when the projected JSON does not fit the record.
    pub fn decode<T: DeserializeOwned>(&self, tree: &AttributeTree) -> Result<T> {
        serde_json::from_value(self.project(tree)).map_err(|e| Error::codec("<root>", e.to_string()))
    }

    /// Merges a typed record into a tree.
    ///
    /// Fields missing or null in the record keep their prior value. Fields
    /// outside the schema are ignored. Single-item blocks are re-wrapped into
    /// one element lists.
    ///
    /// # Errors
    ///
    /// Returns an error when the record does not serialize to a JSON object.
    pub fn encode<T: Serialize>(&self, record: &T, tree: &mut AttributeTree) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let serde_json::Value::Object(fields) = value else {
            return Err(Error::codec("<root>", "record must serialize to an object"));
        };
        merge_map(self.schema, tree.as_map_mut(), fields, self.options);
        Ok(())
    }

    fn project_map(
        &self,
        schema: &Schema,
        map: &BTreeMap<String, AttributeValue>,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (name, attribute) in &schema.attributes {
            let Some(value) = map.get(name) else {
                continue;
            };
            if let Some(projected) = self.project_value(attribute, value) {
                out.insert(self.options.field_case.record_name(name), projected);
            }
        }
        out
    }

    fn project_value(&self, attribute: &Attribute, value: &AttributeValue) -> Option<serde_json::Value> {
        match value.presence() {
            Presence::Absent => return None,
            Presence::ExplicitZero
                if self.options.zero_mode == ZeroMode::OmitZeros && attribute.mode != Mode::Required =>
            {
                return None;
            }
            _ => {}
        }

        match (&attribute.attr_type, value) {
            (AttributeType::Block { schema, .. }, AttributeValue::List(items)) => {
                let objects: Vec<serde_json::Value> = items
                    .iter()
                    .filter_map(AttributeValue::as_map)
                    .map(|element| serde_json::Value::Object(self.project_map(schema, element)))
                    .collect();
                if attribute.is_single_block() && self.options.unwrap_single_item_list {
                    objects.into_iter().next()
                } else {
                    Some(serde_json::Value::Array(objects))
                }
            }
            _ => Some(value.to_json()),
        }
    }
}

fn merge_map(
    schema: &Schema,
    map: &mut BTreeMap<String, AttributeValue>,
    fields: serde_json::Map<String, serde_json::Value>,
    options: CodecOptions,
) {
    for (field, incoming) in fields {
        if incoming.is_null() {
            continue;
        }
        let name = options.field_case.attribute_name(&field);
        let Some(attribute) = schema.attributes.get(&name) else {
            continue;
        };
        let existing = map.remove(&name).unwrap_or_default();
        let merged = merge_value(attribute, existing, incoming, options);
        map.insert(name, merged);
    }
}

fn merge_value(
    attribute: &Attribute,
    existing: AttributeValue,
    incoming: serde_json::Value,
    options: CodecOptions,
) -> AttributeValue {
    match (&attribute.attr_type, incoming) {
        (AttributeType::Block { schema, .. }, serde_json::Value::Object(fields))
            if attribute.is_single_block() && options.unwrap_single_item_list =>
        {
            let mut element = first_element(existing);
            merge_map(schema, &mut element, fields, options);
            AttributeValue::List(vec![AttributeValue::Map(element)])
        }
        (AttributeType::Block { schema, .. }, serde_json::Value::Array(items)) => {
            let mut prior = match existing {
                AttributeValue::List(items) => items.into_iter(),
                _ => Vec::new().into_iter(),
            };
            AttributeValue::List(
                items
                    .into_iter()
                    .map(|item| {
                        let mut element = match prior.next() {
                            Some(AttributeValue::Map(map)) => map,
                            _ => BTreeMap::new(),
                        };
                        if let serde_json::Value::Object(fields) = item {
                            merge_map(schema, &mut element, fields, options);
                        }
                        AttributeValue::Map(element)
                    })
                    .collect(),
            )
        }
        (attr_type, incoming) => coerce(attr_type, AttributeValue::from_json(incoming)),
    }
}

fn first_element(existing: AttributeValue) -> BTreeMap<String, AttributeValue> {
    match existing {
        AttributeValue::List(items) => match items.into_iter().next() {
            Some(AttributeValue::Map(map)) => map,
            _ => BTreeMap::new(),
        },
        _ => BTreeMap::new(),
    }
}

/// Adjusts number representations to the declared type.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn coerce(attr_type: &AttributeType, value: AttributeValue) -> AttributeValue {
    match (attr_type, value) {
        (AttributeType::Int, AttributeValue::Float(f)) if f.fract() == 0.0 => AttributeValue::Int(f as i64),
        (AttributeType::Float, AttributeValue::Int(i)) => AttributeValue::Float(i as f64),
        (AttributeType::List(elem) | AttributeType::Set(elem), AttributeValue::List(items)) => {
            AttributeValue::List(items.into_iter().map(|item| coerce(elem, item)).collect())
        }
        (AttributeType::Map(elem), AttributeValue::Map(map)) => {
            AttributeValue::Map(map.into_iter().map(|(k, v)| (k, coerce(elem, v))).collect())
        }
        (_, value) => value,
    }
}
