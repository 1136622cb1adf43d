//! Resource definitions and the handler trait.
//!
//! A [`ResourceDefinition`] is the per-type record the engine works from: the
//! schema, the handler performing the REST calls, timeouts, plan-time
//! policies, identity and conflict strategies, an optional default-singleton
//! sentinel and an optional deprecation notice.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::attribute::AttributeTree;
use crate::classify::ConflictDetection;
use crate::context::{Verb, VerbContext};
use crate::error::{Error, Result};
use crate::identity::{IdentityStrategy, ResourceId};
use crate::policy::Policy;
use crate::schema::Schema;
use crate::transport::ApiClient;

/// Per-verb timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Create, including the read that follows
    pub create: Duration,
    /// Read and import
    pub read: Duration,
    /// Update, including the read that follows
    pub update: Duration,
    /// Delete
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(180),
            read: Duration::from_secs(60),
            update: Duration::from_secs(180),
            delete: Duration::from_secs(180),
        }
    }
}

impl Timeouts {
    /// All verbs share one timeout.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Timeout of a verb.
    #[must_use]
    pub fn for_verb(&self, verb: Verb) -> Duration {
        match verb {
            Verb::Create => self.create,
            Verb::Plan | Verb::Read | Verb::Import => self.read,
            Verb::Update => self.update,
            Verb::Delete => self.delete,
        }
    }
}

/// How create handles an object that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// 409 triggers find, then update.
    #[default]
    Status,
    /// 409 or an "already exists" body triggers find, then update.
    StatusOrBody,
    /// Search by natural key before creating; a match is updated instead.
    ListFirst,
    /// Conflicts reach the host.
    Surface,
}

impl ConflictStrategy {
    /// Conflict detection for the create call.
    #[must_use]
    pub fn detection(self) -> ConflictDetection {
        match self {
            Self::StatusOrBody => ConflictDetection::StatusOrBody,
            Self::Status | Self::ListFirst | Self::Surface => ConflictDetection::Status,
        }
    }

    /// Returns true when a conflict is recovered by find and update.
    #[must_use]
    pub fn recovers(self) -> bool {
        self != Self::Surface
    }
}

/// Who owns a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// Created and deletable by the user.
    #[default]
    UserManaged,
    /// Provided by CAST AI; delete disables it.
    BuiltIn,
}

/// Result of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    /// The response carried the primary key.
    Id(String),
    /// The response carried no key; search by this name.
    Name(String),
}

/// Deprecation notice of a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    /// Warning shown on every plan
    pub message: String,
    /// Type that replaces this one
    pub replacement: Option<&'static str>,
}

/// Attribute value marking a server-provisioned default singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    /// Attribute to check
    pub attribute: &'static str,
    /// Value marking the singleton
    pub value: &'static str,
}

/// REST operations of one resource type.
///
/// Handlers map trees to typed API payloads and back; the orchestrator owns
/// identity, drift, conflicts, singletons and retries.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Creates the remote object.
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created>;

    /// Fetches the remote object and writes it into `state`.
    ///
    /// Returns `NotFound` when the object is gone.
    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership>;

    /// Sends the updatable subset of `planned`.
    async fn update(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        prior: &AttributeTree,
        planned: &AttributeTree,
    ) -> Result<()>;

    /// Deletes the remote object.
    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, state: &AttributeTree) -> Result<()>;

    /// Disables a built-in object.
    async fn disable(
        &self,
        _api: &ApiClient,
        ctx: &VerbContext,
        _id: &ResourceId,
        _state: &AttributeTree,
    ) -> Result<()> {
        Err(Error::unsupported(ctx.resource_type(), "disable"))
    }

    /// Searches the object by name within its parents. Returns the primary key.
    async fn find_by_name(
        &self,
        _api: &ApiClient,
        ctx: &VerbContext,
        _parents: &[String],
        _name: &str,
    ) -> Result<Option<String>> {
        Err(Error::unsupported(ctx.resource_type(), "search by name"))
    }

    /// Natural key of a planned tree, used for list-first upserts and
    /// conflict recovery. `None` disables both.
    fn natural_key(&self, _planned: &AttributeTree) -> Option<String> {
        None
    }

    /// Ownership recorded in a persisted tree, when known without a fetch.
    fn ownership(&self, _state: &AttributeTree) -> Option<Ownership> {
        None
    }

    /// Normalises a freshly read tree.
    fn normalize(&self, _state: &mut AttributeTree) {}
}

/// Everything the engine knows about one resource type.
#[derive(Clone)]
pub struct ResourceDefinition {
    type_name: &'static str,
    schema: Schema,
    handler: Arc<dyn ResourceHandler>,
    timeouts: Timeouts,
    identity: IdentityStrategy,
    parents: &'static [&'static str],
    conflicts: ConflictStrategy,
    singleton: Option<Sentinel>,
    policies: Vec<Policy>,
    deprecation: Option<Deprecation>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("type_name", &self.type_name)
            .field("identity", &self.identity)
            .field("parents", &self.parents)
            .field("conflicts", &self.conflicts)
            .field("singleton", &self.singleton)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl ResourceDefinition {
    /// Starts a definition.
    pub fn builder(type_name: &'static str, handler: impl ResourceHandler + 'static) -> ResourceDefinitionBuilder {
        ResourceDefinitionBuilder {
            definition: Self {
                type_name,
                schema: Schema::v0().with_id(),
                handler: Arc::new(handler),
                timeouts: Timeouts::default(),
                identity: IdentityStrategy::ServerUuid,
                parents: &[],
                conflicts: ConflictStrategy::Status,
                singleton: None,
                policies: Vec::new(),
                deprecation: None,
            },
        }
    }

    /// Type name, e.g. `castai_node_template`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Schema, including the computed `id`.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// REST handler.
    #[must_use]
    pub fn handler(&self) -> &dyn ResourceHandler {
        self.handler.as_ref()
    }

    /// Per-verb timeouts.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Identity strategy.
    #[must_use]
    pub fn identity(&self) -> IdentityStrategy {
        self.identity
    }

    /// Parent attributes, in import path order.
    #[must_use]
    pub fn parents(&self) -> &'static [&'static str] {
        self.parents
    }

    /// Conflict strategy.
    #[must_use]
    pub fn conflicts(&self) -> ConflictStrategy {
        self.conflicts
    }

    /// Plan-time policies.
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Deprecation notice.
    #[must_use]
    pub fn deprecation(&self) -> Option<&Deprecation> {
        self.deprecation.as_ref()
    }

    /// Identifier of a persisted tree.
    #[must_use]
    pub fn resource_id(&self, tree: &AttributeTree) -> Option<ResourceId> {
        ResourceId::from_tree(tree, self.parents)
    }

    /// Values of the parent attributes, `None` when one is unset.
    #[must_use]
    pub fn parent_values(&self, tree: &AttributeTree) -> Option<Vec<String>> {
        self.parents
            .iter()
            .map(|name| tree.get_non_empty_str(name).map(str::to_string))
            .collect()
    }

    /// Identifier of the default singleton a tree addresses, if any.
    #[must_use]
    pub fn singleton_id(&self, tree: &AttributeTree) -> Option<ResourceId> {
        let sentinel = self.singleton?;
        if tree.get_str(sentinel.attribute) != Some(sentinel.value) {
            return None;
        }
        Some(ResourceId::with_parents(sentinel.value, self.parent_values(tree)?))
    }
}

/// Builder for [`ResourceDefinition`].
#[derive(Debug)]
pub struct ResourceDefinitionBuilder {
    definition: ResourceDefinition,
}

impl ResourceDefinitionBuilder {
    /// Sets the schema. A computed `id` is added when missing.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.definition.schema = schema.with_id();
        self
    }

    /// Sets the timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.definition.timeouts = timeouts;
        self
    }

    /// Sets the identity strategy.
    #[must_use]
    pub fn identity(mut self, identity: IdentityStrategy) -> Self {
        self.definition.identity = identity;
        self
    }

    /// Sets the parent attributes.
    #[must_use]
    pub fn parents(mut self, parents: &'static [&'static str]) -> Self {
        self.definition.parents = parents;
        self
    }

    /// Sets the conflict strategy.
    #[must_use]
    pub fn conflicts(mut self, conflicts: ConflictStrategy) -> Self {
        self.definition.conflicts = conflicts;
        self
    }

    /// Declares a server-provisioned default singleton.
    #[must_use]
    pub fn default_singleton(mut self, attribute: &'static str, value: &'static str) -> Self {
        self.definition.singleton = Some(Sentinel { attribute, value });
        self
    }

    /// Adds a plan-time policy.
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.definition.policies.push(policy);
        self
    }

    /// Marks the type as deprecated.
    #[must_use]
    pub fn deprecated(mut self, message: impl Into<String>, replacement: Option<&'static str>) -> Self {
        self.definition.deprecation = Some(Deprecation {
            message: message.into(),
            replacement,
        });
        self
    }

    /// Finishes the definition.
    #[must_use]
    pub fn build(self) -> ResourceDefinition {
        self.definition
    }
}
