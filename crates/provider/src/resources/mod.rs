//! Concrete CAST AI resources.
//!
//! Each module exposes a `definition()` and keeps its API records private.
//! Handlers only translate between attribute trees and REST payloads; the
//! engine's lifecycle owns drift, conflicts and retries.

use castai_engine::{
    AttributePath, AttributeTree, Codec, CodecOptions, Error, FieldCase, ResourceDefinition,
    ResourceId, Result, Schema,
};

pub mod cache_configuration;
pub mod cache_rule;
pub mod commitments;
pub mod node_template;
pub mod organization_group;
pub mod reservations;
pub mod role_bindings;
pub mod runtime_security_rule;

/// Every resource the provider serves.
#[must_use]
pub fn definitions() -> Vec<ResourceDefinition> {
    vec![
        cache_configuration::definition(),
        cache_rule::definition(),
        commitments::definition(),
        node_template::definition(),
        organization_group::definition(),
        reservations::definition(),
        role_bindings::definition(),
        runtime_security_rule::definition(),
    ]
}

/// Codec for CAST AI records, which use camel case fields.
pub(crate) fn api_codec(schema: &Schema) -> Codec<'_> {
    Codec::new(schema).with_options(CodecOptions::camel())
}

/// Codec for request bodies that must not carry zero values.
pub(crate) fn sparse_codec(schema: &Schema) -> Codec<'_> {
    Codec::new(schema).with_options(CodecOptions::sparse().with_field_case(FieldCase::Camel))
}

/// A string attribute the schema marks as required.
pub(crate) fn required_str<'a>(tree: &'a AttributeTree, name: &str) -> Result<&'a str> {
    tree.get_non_empty_str(name)
        .ok_or_else(|| Error::config_invalid_at(AttributePath::attr(name), format!("{name} must be set")))
}

/// Parent key of an identifier, as declared on the definition.
pub(crate) fn parent<'a>(id: &'a ResourceId, index: usize, name: &str) -> Result<&'a str> {
    id.parent(index)
        .ok_or_else(|| Error::config_invalid(format!("identifier `{id}` has no {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use castai_engine::ResourceRegistry;

    #[test]
    fn test_every_type_is_unique_and_prefixed() {
        let definitions = definitions();
        let mut registry = ResourceRegistry::new();
        for definition in definitions.iter().cloned() {
            registry.register(definition);
        }
        assert_eq!(registry.len(), definitions.len());
        assert!(registry.resource_types().iter().all(|t| t.starts_with("castai_")));
    }

    #[test]
    fn test_every_schema_has_id() {
        for definition in definitions() {
            assert!(definition.schema().get("id").is_some(), "{}", definition.type_name());
        }
    }
}
