//! Provider assembly: registry of every CAST AI resource and the dispatcher
//! serving it.

use std::sync::Arc;

use castai_engine::{Dispatcher, ResourceRegistry};
use tracing::debug;

use crate::resources;

/// Provider name reported to the host.
pub const PROVIDER_NAME: &str = "castai";

/// Registry with every resource this provider serves.
#[must_use]
pub fn registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    for definition in resources::definitions() {
        registry.register(definition);
    }
    debug!(resource_types = ?registry.resource_types(), "Resource registry built");
    registry
}

/// Dispatcher over [`registry`], waiting for `ConfigureProvider`.
#[must_use]
pub fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(registry()))
}
