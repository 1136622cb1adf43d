//! Resource type registry
//!
//! Maps resource type names to their definitions. The registry is filled once
//! at startup and only read afterwards, so it is shared behind an `Arc`
//! without locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::resource::ResourceDefinition;

/// Registry of resource definitions
///
/// # Example
///
/// ```ignore
/// use castai_engine::ResourceRegistry;
///
/// let mut registry = ResourceRegistry::new();
/// registry.register(node_template::definition());
///
/// let definition = registry.require("castai_node_template")?;
/// ```
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<&'static str, Arc<ResourceDefinition>>,
}

impl ResourceRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            resources: BTreeMap::new(),
        }
    }

    /// Register a definition
    ///
    /// A definition with the same type name is replaced.
    pub fn register(&mut self, definition: ResourceDefinition) {
        self.resources
            .insert(definition.type_name(), Arc::new(definition));
    }

    /// Get a definition by type name
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<ResourceDefinition>> {
        self.resources.get(type_name).cloned()
    }

    /// Get a definition by type name, failing for unknown types
    ///
    /// # Errors
    ///
    /// Returns `UnknownResourceType` when nothing is registered under the name.
    pub fn require(&self, type_name: &str) -> Result<Arc<ResourceDefinition>> {
        self.get(type_name)
            .ok_or_else(|| Error::UnknownResourceType {
                type_name: type_name.to_string(),
            })
    }

    /// Check if a type is registered
    #[must_use]
    pub fn has(&self, type_name: &str) -> bool {
        self.resources.contains_key(type_name)
    }

    /// Registered type names, sorted
    #[must_use]
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }

    /// Iterate over the definitions in type name order
    pub fn definitions(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.resources.values().map(AsRef::as_ref)
    }

    /// Host-facing schemas of every registered type
    #[must_use]
    pub fn schemas(&self) -> BTreeMap<String, serde_json::Value> {
        self.definitions()
            .map(|definition| {
                let mut schema = definition.schema().to_json();
                if let (Some(deprecation), Some(object)) =
                    (definition.deprecation(), schema.as_object_mut())
                {
                    object.insert(
                        "deprecation_message".to_string(),
                        deprecation.message.clone().into(),
                    );
                }
                (definition.type_name().to_string(), schema)
            })
            .collect()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resource_types", &self.resource_types())
            .finish()
    }
}
