//! Lifecycle orchestrator.
//!
//! Runs plan, create, read, update, delete and import for any
//! [`ResourceDefinition`]. The orchestrator owns the generic semantics:
//!
//! - A read that finds nothing clears the identifier and succeeds
//! - Create and update always finish with a read; that read retries `NotFound`
//!   until the deadline instead of absorbing it
//! - Default singletons are upserted on create and only detached on delete
//! - Built-in objects are disabled instead of deleted
//! - Conflicts on create are recovered by find and update where the type allows
//! - Update without user-visible changes performs no I/O
//! - Planning normalises the proposed tree the way a read does
//! - A tainted instance is replaced on the next plan

use std::time::Instant;

use tracing::{debug, instrument};

use crate::attribute::{AttributePath, AttributeTree, AttributeValue, ID_ATTRIBUTE, Presence};
use crate::context::VerbContext;
use crate::error::{Error, ErrorContext, Result};
use crate::identity::{IdentityStrategy, ImportHandle, ImportKey, ResourceId};
use crate::policy::{self, PlanContext};
use crate::resource::{ConflictStrategy, Created, Ownership, ResourceDefinition};
use crate::retry::{RetryConfig, retry_until_deadline};
use crate::schema::Mode;
use crate::transport::ApiClient;

/// What the host persists for one resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceInstance {
    /// External identifier, `None` once the object is gone
    pub id: Option<ResourceId>,
    /// Last known attributes
    pub state: AttributeTree,
    /// Forces recreation on the next plan
    pub tainted: bool,
}

impl ResourceInstance {
    /// Instance of a known remote object.
    #[must_use]
    pub fn new(id: ResourceId, state: AttributeTree) -> Self {
        Self {
            id: Some(id),
            state,
            tainted: false,
        }
    }

    /// Instance rebuilt from a persisted tree.
    #[must_use]
    pub fn from_state(definition: &ResourceDefinition, state: AttributeTree) -> Self {
        Self {
            id: definition.resource_id(&state),
            state,
            tainted: false,
        }
    }

    /// Marks the instance for replacement.
    #[must_use]
    pub fn with_taint(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }
}

/// Result of planning a change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// Planned tree
    pub planned: AttributeTree,
    /// Force-new attributes that changed
    pub requires_replace: Vec<AttributePath>,
    /// Warnings for the host
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adoption {
    ListFirst,
    Conflict,
    Singleton,
}

impl Adoption {
    fn as_str(self) -> &'static str {
        match self {
            Self::ListFirst => "list-first",
            Self::Conflict => "conflict",
            Self::Singleton => "default singleton",
        }
    }
}

/// Plans a change: defaults, normalization, validation, computed carry-over,
/// policies and replacement paths. Performs no I/O.
///
/// # Errors
///
/// Returns `Rejected` with every schema and policy violation.
pub fn plan_change(
    definition: &ResourceDefinition,
    prior: Option<&AttributeTree>,
    proposed: AttributeTree,
) -> Result<PlanOutcome> {
    plan_tree(definition, prior, false, proposed)
}

/// Plans a change against a persisted instance. A tainted instance is
/// replaced even when no force-new attribute changed.
///
/// # Errors
///
/// Returns `Rejected` with every schema and policy violation.
pub fn plan_instance_change(
    definition: &ResourceDefinition,
    prior: Option<&ResourceInstance>,
    proposed: AttributeTree,
) -> Result<PlanOutcome> {
    let tainted = prior.is_some_and(|instance| instance.tainted);
    plan_tree(definition, prior.map(|instance| &instance.state), tainted, proposed)
}

fn plan_tree(
    definition: &ResourceDefinition,
    prior: Option<&AttributeTree>,
    tainted: bool,
    proposed: AttributeTree,
) -> Result<PlanOutcome> {
    let schema = definition.schema();
    let mut planned = proposed;

    schema.apply_defaults(&mut planned);
    // planned values must match what a read stores
    definition.handler().normalize(&mut planned);
    if let Some(prior) = prior {
        schema.carry_computed(prior, &mut planned);
    }

    let mut errors = schema.validate(&planned);
    {
        let mut ctx = PlanContext {
            type_name: definition.type_name(),
            prior,
            planned: &mut planned,
        };
        errors.extend(policy::evaluate_all(definition.policies(), &mut ctx));
    }
    if !errors.is_empty() {
        return Err(Error::Rejected { errors });
    }

    let mut requires_replace = prior.map(|prior| schema.replace_paths(prior, &planned)).unwrap_or_default();
    if tainted && prior.is_some() && requires_replace.is_empty() {
        requires_replace.push(AttributePath::attr(ID_ATTRIBUTE));
    }
    if !requires_replace.is_empty() {
        // the replacement gets fresh server-side values
        for (name, attribute) in &schema.attributes {
            if attribute.mode == Mode::Computed {
                planned.set(name.clone(), AttributeValue::Null);
            }
        }
    }

    let mut warnings = Vec::new();
    if let Some(deprecation) = definition.deprecation() {
        warnings.push(deprecation.message.clone());
    }
    for (name, attribute) in &schema.attributes {
        if let Some(message) = &attribute.deprecated
            && planned.get(name).presence() == Presence::Set
            && attribute.mode != Mode::Computed
        {
            warnings.push(format!("{name} is deprecated: {message}"));
        }
    }

    Ok(PlanOutcome {
        planned,
        requires_replace,
        warnings,
    })
}

/// Runs the verbs of one resource type.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle<'a> {
    definition: &'a ResourceDefinition,
    api: &'a ApiClient,
    retry: &'a RetryConfig,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl<'a> Lifecycle<'a> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(definition: &'a ResourceDefinition, api: &'a ApiClient, retry: &'a RetryConfig) -> Self {
        Self { definition, api, retry }
    }

    fn type_name(&self) -> &'static str {
        self.definition.type_name()
    }

    /// Plans a change. See [`plan_change`].
    ///
    /// # Errors
    ///
    /// Returns `Rejected` with every schema and policy violation.
    pub fn plan(&self, prior: Option<&AttributeTree>, proposed: AttributeTree) -> Result<PlanOutcome> {
        plan_change(self.definition, prior, proposed)
    }

    /// Creates the remote object and reads it back.
    ///
    /// # Errors
    ///
    /// Returns the classified upstream error; no identifier is recorded then.
    #[instrument(name = "create", skip_all, fields(resource_type = %self.type_name()))]
    pub async fn create(&self, ctx: &VerbContext, planned: AttributeTree) -> Result<ResourceInstance> {
        let started = Instant::now();
        crate::emit_castai_resource_creating!(self.type_name());

        match self.create_inner(ctx, planned).await {
            Ok(instance) => {
                let id = instance.id.as_ref().map_or("", ResourceId::display_id);
                crate::emit_castai_resource_created!(id, self.type_name(), elapsed_ms(started));
                Ok(instance)
            }
            Err(err) => {
                crate::emit_castai_resource_failed!("", self.type_name(), "create", err);
                Err(err.in_resource(self.type_name(), None))
            }
        }
    }

    async fn create_inner(&self, ctx: &VerbContext, planned: AttributeTree) -> Result<ResourceInstance> {
        let definition = self.definition;
        let handler = definition.handler();

        if let Some(id) = definition.singleton_id(&planned) {
            return self.upsert_singleton(ctx, id, planned).await;
        }

        if definition.conflicts() == ConflictStrategy::ListFirst
            && let Some(id) = self.find_existing(ctx, &planned).await?
        {
            return self.adopt(ctx, id, planned, Adoption::ListFirst).await;
        }

        let created = match handler.create(self.api, ctx, &planned).await {
            Ok(created) => created,
            Err(err) if err.is_conflict() && definition.conflicts().recovers() => {
                debug!(error = %err, "Create conflicted, searching for the existing object");
                match self.find_existing(ctx, &planned).await? {
                    Some(id) => return self.adopt(ctx, id, planned, Adoption::Conflict).await,
                    None => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        let parents = definition.parent_values(&planned).unwrap_or_default();
        let primary = match created {
            Created::Id(primary) => primary,
            Created::Name(name) => handler
                .find_by_name(self.api, ctx, &parents, &name)
                .await?
                .ok_or_else(|| {
                    Error::fatal(
                        ErrorContext::default(),
                        format!("created object `{name}` could not be found by name"),
                    )
                })?,
        };

        let id = ResourceId::with_parents(primary, parents);
        self.read_after_write(ctx, ResourceInstance::new(id, planned)).await
    }

    async fn find_existing(&self, ctx: &VerbContext, planned: &AttributeTree) -> Result<Option<ResourceId>> {
        let handler = self.definition.handler();
        let Some(key) = handler.natural_key(planned) else {
            return Ok(None);
        };
        let parents = self.definition.parent_values(planned).unwrap_or_default();
        Ok(handler
            .find_by_name(self.api, ctx, &parents, &key)
            .await?
            .map(|primary| ResourceId::with_parents(primary, parents)))
    }

    async fn adopt(
        &self,
        ctx: &VerbContext,
        id: ResourceId,
        planned: AttributeTree,
        reason: Adoption,
    ) -> Result<ResourceInstance> {
        crate::emit_castai_resource_adopted!(id.display_id(), self.type_name(), reason.as_str());
        let mut prior = planned.clone();
        id.write_to(&mut prior, self.definition.parents());
        self.definition
            .handler()
            .update(self.api, ctx, &id, &prior, &planned)
            .await?;
        self.read_after_write(ctx, ResourceInstance::new(id, planned)).await
    }

    async fn upsert_singleton(
        &self,
        ctx: &VerbContext,
        id: ResourceId,
        planned: AttributeTree,
    ) -> Result<ResourceInstance> {
        let handler = self.definition.handler();
        let mut prior = planned.clone();
        id.write_to(&mut prior, self.definition.parents());

        retry_until_deadline(
            ctx,
            self.retry,
            "upsert default singleton",
            |err| err.is_not_found() || err.is_transient(),
            || handler.update(self.api, ctx, &id, &prior, &planned),
        )
        .await?;

        crate::emit_castai_resource_adopted!(id.display_id(), self.type_name(), Adoption::Singleton.as_str());
        self.read_after_write(ctx, ResourceInstance::new(id, planned)).await
    }

    async fn fetch(
        &self,
        ctx: &VerbContext,
        id: &ResourceId,
        base: &AttributeTree,
    ) -> Result<(AttributeTree, Ownership)> {
        let handler = self.definition.handler();
        let mut state = base.clone();
        let ownership = handler.read(self.api, ctx, id, &mut state).await?;
        handler.normalize(&mut state);
        id.write_to(&mut state, self.definition.parents());
        Ok((state, ownership))
    }

    async fn read_after_write(&self, ctx: &VerbContext, instance: ResourceInstance) -> Result<ResourceInstance> {
        let Some(id) = instance.id.clone() else {
            return Err(Error::fatal(ErrorContext::default(), "written object has no identifier"));
        };

        let (state, _) = retry_until_deadline(ctx, self.retry, "read after write", Error::is_not_found, || {
            self.fetch(ctx, &id, &instance.state)
        })
        .await
        .map_err(|err| {
            if err.is_not_found() {
                Error::fatal(
                    err.context().cloned().unwrap_or_default(),
                    "remote object is not visible after it was written",
                )
            } else {
                err
            }
        })?;

        Ok(ResourceInstance {
            id: Some(id),
            state,
            tainted: false,
        })
    }

    /// Refreshes an instance. `None` when the remote object is gone.
    ///
    /// # Errors
    ///
    /// Returns any upstream error other than `NotFound`.
    #[instrument(name = "read", skip_all, fields(resource_type = %self.type_name()))]
    pub async fn read(&self, ctx: &VerbContext, instance: ResourceInstance) -> Result<Option<ResourceInstance>> {
        let Some(id) = instance.id.clone() else {
            return Ok(None);
        };

        match self.fetch(ctx, &id, &instance.state).await {
            Ok((state, _)) => {
                crate::emit_castai_resource_refreshed!(id.display_id(), self.type_name());
                Ok(Some(ResourceInstance {
                    id: Some(id),
                    state,
                    tainted: instance.tainted,
                }))
            }
            Err(err) if err.is_not_found() => {
                crate::emit_castai_resource_drift_absorbed!(id.display_id(), self.type_name());
                Ok(None)
            }
            Err(err) => Err(err.in_resource(self.type_name(), Some(id.display_id()))),
        }
    }

    /// Applies a planned change and reads the result back.
    ///
    /// # Errors
    ///
    /// Returns the classified upstream error; the prior state stays valid.
    #[instrument(name = "update", skip_all, fields(resource_type = %self.type_name()))]
    pub async fn update(
        &self,
        ctx: &VerbContext,
        prior: ResourceInstance,
        planned: AttributeTree,
    ) -> Result<ResourceInstance> {
        let started = Instant::now();
        let id = prior
            .id
            .clone()
            .or_else(|| self.definition.resource_id(&planned))
            .ok_or_else(|| Error::config_invalid("cannot update a resource without an identifier"))?;

        let changes = self.definition.schema().user_changes(&prior.state, &planned);
        if changes.is_empty() {
            crate::emit_castai_resource_update_skipped!(id.display_id(), self.type_name());
            let mut state = planned;
            id.write_to(&mut state, self.definition.parents());
            return Ok(ResourceInstance::new(id, state));
        }

        let changed: Vec<String> = changes.iter().map(|c| c.path.to_string()).collect();
        crate::emit_castai_resource_updating!(id.display_id(), self.type_name(), changed);

        let result = async {
            self.definition
                .handler()
                .update(self.api, ctx, &id, &prior.state, &planned)
                .await?;
            self.read_after_write(ctx, ResourceInstance::new(id.clone(), planned))
                .await
        }
        .await;

        match result {
            Ok(instance) => {
                crate::emit_castai_resource_updated!(id.display_id(), self.type_name(), elapsed_ms(started));
                Ok(instance)
            }
            Err(err) => {
                crate::emit_castai_resource_failed!(id.display_id(), self.type_name(), "update", err);
                Err(err.in_resource(self.type_name(), Some(id.display_id())))
            }
        }
    }

    /// Deletes, disables or detaches the remote object.
    ///
    /// # Errors
    ///
    /// Returns any upstream error other than `NotFound`.
    #[instrument(name = "delete", skip_all, fields(resource_type = %self.type_name()))]
    pub async fn delete(&self, ctx: &VerbContext, instance: ResourceInstance) -> Result<()> {
        if let Some(id) = self.definition.singleton_id(&instance.state) {
            crate::emit_castai_resource_detached!(id.display_id(), self.type_name());
            return Ok(());
        }
        let Some(id) = instance.id.clone() else {
            return Ok(());
        };

        let started = Instant::now();
        crate::emit_castai_resource_deleting!(id.display_id(), self.type_name());

        match self.delete_inner(ctx, &id, &instance.state).await {
            Ok(()) => {
                crate::emit_castai_resource_deleted!(id.display_id(), self.type_name(), elapsed_ms(started));
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                crate::emit_castai_resource_deleted!(id.display_id(), self.type_name(), elapsed_ms(started));
                Ok(())
            }
            Err(err) => {
                crate::emit_castai_resource_failed!(id.display_id(), self.type_name(), "delete", err);
                Err(err.in_resource(self.type_name(), Some(id.display_id())))
            }
        }
    }

    async fn delete_inner(&self, ctx: &VerbContext, id: &ResourceId, state: &AttributeTree) -> Result<()> {
        let handler = self.definition.handler();

        let ownership = match handler.ownership(state) {
            Some(Ownership::BuiltIn) => Ownership::BuiltIn,
            _ => self.fetch(ctx, id, state).await?.1,
        };

        match ownership {
            Ownership::BuiltIn => {
                handler.disable(self.api, ctx, id, state).await?;
                crate::emit_castai_resource_disabled!(id.display_id(), self.type_name());
                Ok(())
            }
            Ownership::UserManaged => handler.delete(self.api, ctx, id, state).await,
        }
    }

    /// Imports an existing remote object from a handle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidImportHandle` for malformed handles and
    /// `ImportNotFound` when nothing matches.
    #[instrument(name = "import", skip_all, fields(resource_type = %self.type_name(), handle = %handle))]
    pub async fn import(&self, ctx: &VerbContext, handle: &str) -> Result<ResourceInstance> {
        let definition = self.definition;
        let parsed = ImportHandle::parse(handle, definition.parents())?;
        let not_found = || Error::ImportNotFound {
            type_name: self.type_name().to_string(),
            handle: handle.to_string(),
        };

        let primary = match (&parsed.key, definition.identity()) {
            (ImportKey::Uuid(uuid), IdentityStrategy::ServerUuid | IdentityStrategy::SearchByName) => uuid.to_string(),
            (key, _) => definition
                .handler()
                .find_by_name(self.api, ctx, &parsed.parents, &key.as_text())
                .await
                .map_err(|err| err.in_resource(self.type_name(), None))?
                .ok_or_else(not_found)?,
        };

        let id = ResourceId::with_parents(primary, parsed.parents);
        let mut seed = AttributeTree::new();
        id.write_to(&mut seed, definition.parents());

        let instance = self
            .read(ctx, ResourceInstance::new(id, seed))
            .await?
            .ok_or_else(not_found)?;
        let imported_id = instance.id.as_ref().map_or("", ResourceId::display_id);
        crate::emit_castai_resource_imported!(imported_id, self.type_name(), handle);
        Ok(instance)
    }
}
