//! Host values encoded as JSON or MessagePack.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeTree, AttributeValue};
use crate::error::Result;

/// A value exchanged with the host.
///
/// Exactly one encoding is normally present. A value with neither encoding,
/// or with a JSON `null`, represents "no object" (a resource being created has
/// no prior state, a resource being destroyed has no planned state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicValue {
    /// JSON encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// MessagePack encoding, base64 in the JSON-lines transport
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub msgpack: Option<Vec<u8>>,
}

impl DynamicValue {
    /// The "no object" value.
    #[must_use]
    pub fn null() -> Self {
        Self::default()
    }

    /// JSON encoding of a tree.
    #[must_use]
    pub fn from_tree(tree: &AttributeTree) -> Self {
        Self {
            json: Some(tree.to_json()),
            msgpack: None,
        }
    }

    /// JSON encoding of an optional tree.
    #[must_use]
    pub fn from_optional_tree(tree: Option<&AttributeTree>) -> Self {
        tree.map_or_else(Self::null, Self::from_tree)
    }

    /// MessagePack encoding of a tree.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding fails.
    pub fn msgpack_from_tree(tree: &AttributeTree) -> Result<Self> {
        Ok(Self {
            json: None,
            msgpack: Some(rmp_serde::to_vec_named(tree)?),
        })
    }

    /// Returns true for the "no object" value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match (&self.json, &self.msgpack) {
            (Some(json), _) => json.is_null(),
            (None, Some(bytes)) => bytes.is_empty() || bytes == &[0xc0],
            (None, None) => true,
        }
    }

    /// Decodes into a tree. `None` for the "no object" value.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not an object.
    pub fn to_tree(&self) -> Result<Option<AttributeTree>> {
        if self.is_null() {
            return Ok(None);
        }
        let value = match (&self.json, &self.msgpack) {
            (Some(json), _) => json.clone(),
            (None, Some(bytes)) => rmp_serde::from_slice::<AttributeValue>(bytes)?.to_json(),
            (None, None) => return Ok(None),
        };
        AttributeTree::from_json(value).map(Some)
    }
}

mod base64_bytes {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
