//! Host request dispatcher.
//!
//! Requests mirror the tfplugin6 verbs. Every request yields a [`Reply`]
//! carrying an optional result and the diagnostics the host shows the user;
//! errors never escape as panics or transport failures.

use std::collections::BTreeMap;
use std::sync::Arc;

use miette::Diagnostic as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ProviderConfig;
use crate::context::{Verb, VerbContext};
use crate::dynamic::DynamicValue;
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, ResourceInstance, plan_change, plan_instance_change};
use crate::registry::ResourceRegistry;
use crate::resource::ResourceDefinition;
use crate::transport::{ApiClient, HttpTransport};

/// A host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Schemas of the provider block and every resource type.
    GetProviderSchema,
    /// Validates and applies the provider block.
    ConfigureProvider {
        /// Provider block
        #[serde(default)]
        config: DynamicValue,
    },
    /// Validates a resource configuration without I/O.
    ValidateResourceConfig {
        /// Resource type
        type_name: String,
        /// Configuration
        #[serde(default)]
        config: DynamicValue,
    },
    /// Plans a create, update or destroy.
    PlanResourceChange {
        /// Resource type
        type_name: String,
        /// Prior state, null on create
        #[serde(default)]
        prior_state: DynamicValue,
        /// Proposed state, null on destroy
        #[serde(default)]
        proposed_new_state: DynamicValue,
        /// The prior object is tainted and must be replaced
        #[serde(default)]
        prior_tainted: bool,
    },
    /// Applies a planned create, update or destroy.
    ApplyResourceChange {
        /// Resource type
        type_name: String,
        /// Prior state, null on create
        #[serde(default)]
        prior_state: DynamicValue,
        /// Planned state, null on destroy
        #[serde(default)]
        planned_state: DynamicValue,
    },
    /// Refreshes a resource.
    ReadResource {
        /// Resource type
        type_name: String,
        /// Persisted state
        #[serde(default)]
        current_state: DynamicValue,
    },
    /// Imports an existing remote object.
    ImportResourceState {
        /// Resource type
        type_name: String,
        /// Import handle
        id: String,
    },
    /// Cancels every running verb.
    StopProvider,
}

impl Request {
    /// Protocol name of the request.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetProviderSchema => "GetProviderSchema",
            Self::ConfigureProvider { .. } => "ConfigureProvider",
            Self::ValidateResourceConfig { .. } => "ValidateResourceConfig",
            Self::PlanResourceChange { .. } => "PlanResourceChange",
            Self::ApplyResourceChange { .. } => "ApplyResourceChange",
            Self::ReadResource { .. } => "ReadResource",
            Self::ImportResourceState { .. } => "ImportResourceState",
            Self::StopProvider => "StopProvider",
        }
    }
}

/// Imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Resource type name
    pub type_name: String,
    /// Resource state
    pub state: DynamicValue,
}

/// Result of a successful request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Provider and resource schemas.
    ProviderSchema {
        /// Provider block schema
        provider: serde_json::Value,
        /// Resource schemas by type name
        resource_schemas: BTreeMap<String, serde_json::Value>,
    },
    /// The provider is configured.
    Configured,
    /// The configuration is valid.
    Validated,
    /// Planned change.
    Planned {
        /// Planned state, null on destroy
        planned_state: DynamicValue,
        /// Attributes forcing replacement
        requires_replace: Vec<String>,
    },
    /// Applied change.
    Applied {
        /// New state, null after destroy
        new_state: DynamicValue,
    },
    /// Refreshed state.
    Read {
        /// New state, null when the remote object is gone
        new_state: DynamicValue,
    },
    /// Imported resources.
    Imported {
        /// Imported resources
        imported_resources: Vec<ImportedResource>,
    },
    /// Running verbs were cancelled.
    Stopped,
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    /// Error that prevents operation
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

/// Diagnostic shown by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Summary message
    pub summary: String,
    /// Detailed message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    /// Attribute path (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_path: Option<String>,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Diagnostic {
    /// A warning without detail.
    #[must_use]
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: String::new(),
            attribute_path: None,
            code: None,
        }
    }

    /// Error diagnostics of an engine error; `Rejected` yields one per
    /// violation.
    #[must_use]
    pub fn from_error(err: Error) -> Vec<Self> {
        err.into_flat()
            .into_iter()
            .map(|err| {
                let detail = match (err.context(), err.help()) {
                    (Some(context), Some(help)) => format!("{context}\n{help}"),
                    (Some(context), None) => context.to_string(),
                    (None, Some(help)) => help.to_string(),
                    (None, None) => String::new(),
                };
                Self {
                    severity: DiagnosticSeverity::Error,
                    summary: err.to_string(),
                    detail,
                    attribute_path: err.attribute_path().map(ToString::to_string),
                    code: err.code().map(|code| code.to_string()),
                }
            })
            .collect()
    }

    /// Returns true for errors.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Result and diagnostics of one request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Result, `None` when an error diagnostic was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Response>,
    /// Diagnostics
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl Reply {
    fn ok(result: Response) -> Self {
        Self {
            result: Some(result),
            diagnostics: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.diagnostics
            .extend(warnings.into_iter().map(Diagnostic::warning));
        self
    }

    fn failed(err: Error) -> Self {
        Self {
            result: None,
            diagnostics: Diagnostic::from_error(err),
        }
    }

    /// Returns true when any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Shared state of a configured provider.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Resolved configuration
    pub config: ProviderConfig,
    /// Classifying API client
    pub api: ApiClient,
}

impl ProviderContext {
    /// Builds the context with the `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn connect(config: ProviderConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self {
            api: ApiClient::new(Arc::new(transport)),
            config,
        })
    }
}

/// Routes host requests to the lifecycle verbs.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ResourceRegistry>,
    context: RwLock<Option<Arc<ProviderContext>>>,
    stop: CancellationToken,
}

impl Dispatcher {
    /// Creates an unconfigured dispatcher.
    #[must_use]
    pub fn new(registry: ResourceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            context: RwLock::new(None),
            stop: CancellationToken::new(),
        }
    }

    /// Creates a dispatcher with an existing context.
    #[must_use]
    pub fn with_context(registry: ResourceRegistry, context: ProviderContext) -> Self {
        let dispatcher = Self::new(registry);
        *dispatcher.context.write() = Some(Arc::new(context));
        dispatcher
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Returns true once `StopProvider` was received.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn provider_context(&self) -> Result<Arc<ProviderContext>> {
        self.context.read().clone().ok_or(Error::NotConfigured)
    }

    /// Handles one request.
    #[instrument(name = "dispatch", skip_all, fields(method = request.method()))]
    pub async fn dispatch(&self, request: Request) -> Reply {
        let result = match request {
            Request::GetProviderSchema => Ok(self.provider_schema()),
            Request::ConfigureProvider { config } => self.configure(&config).map(Reply::ok),
            Request::ValidateResourceConfig { type_name, config } => {
                self.validate(&type_name, &config)
            }
            Request::PlanResourceChange {
                type_name,
                prior_state,
                proposed_new_state,
                prior_tainted,
            } => self.plan(&type_name, &prior_state, &proposed_new_state, prior_tainted),
            Request::ApplyResourceChange {
                type_name,
                prior_state,
                planned_state,
            } => {
                self.apply(&type_name, &prior_state, &planned_state)
                    .await
            }
            Request::ReadResource {
                type_name,
                current_state,
            } => self.read(&type_name, &current_state).await,
            Request::ImportResourceState { type_name, id } => {
                self.import(&type_name, &id).await
            }
            Request::StopProvider => {
                info!("Stop requested, cancelling running operations");
                self.stop.cancel();
                Ok(Reply::ok(Response::Stopped))
            }
        };

        result.unwrap_or_else(Reply::failed)
    }

    fn provider_schema(&self) -> Reply {
        Reply::ok(Response::ProviderSchema {
            provider: ProviderConfig::schema().to_json(),
            resource_schemas: self.registry.schemas(),
        })
    }

    fn configure(&self, config: &DynamicValue) -> Result<Response> {
        let attributes = config.to_tree()?.unwrap_or_default();
        let errors = ProviderConfig::schema().validate(&attributes);
        if !errors.is_empty() {
            return Err(Error::Rejected { errors });
        }

        let context = ProviderContext::connect(ProviderConfig::resolve(&attributes)?)?;
        crate::emit_castai_provider_configured!(context.config.api_url, context.config.user_agent);
        *self.context.write() = Some(Arc::new(context));
        Ok(Response::Configured)
    }

    fn validate(&self, type_name: &str, config: &DynamicValue) -> Result<Reply> {
        let definition = self.registry.require(type_name)?;
        let Some(config) = config.to_tree()? else {
            return Ok(Reply::ok(Response::Validated));
        };
        let outcome = plan_change(&definition, None, config)?;
        Ok(Reply::ok(Response::Validated).with_warnings(outcome.warnings))
    }

    fn plan(&self, type_name: &str, prior: &DynamicValue, proposed: &DynamicValue, tainted: bool) -> Result<Reply> {
        let definition = self.registry.require(type_name)?;
        let prior = prior
            .to_tree()?
            .map(|state| ResourceInstance::from_state(&definition, state).with_taint(tainted));
        let Some(proposed) = proposed.to_tree()? else {
            debug!(resource_type = type_name, "Planning destroy");
            return Ok(Reply::ok(Response::Planned {
                planned_state: DynamicValue::null(),
                requires_replace: Vec::new(),
            }));
        };

        let outcome = plan_instance_change(&definition, prior.as_ref(), proposed)?;
        Ok(Reply::ok(Response::Planned {
            planned_state: DynamicValue::from_tree(&outcome.planned),
            requires_replace: outcome
                .requires_replace
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
        .with_warnings(outcome.warnings))
    }

    fn verb_context(&self, definition: &ResourceDefinition, verb: Verb) -> Result<VerbContext> {
        if self.is_stopped() {
            return Err(Error::Cancelled {
                operation: format!("{verb} {}", definition.type_name()),
            });
        }
        Ok(VerbContext::new(
            definition.type_name(),
            verb,
            definition.timeouts().for_verb(verb),
        )
        .with_cancellation(self.stop.child_token()))
    }

    async fn apply(&self, type_name: &str, prior: &DynamicValue, planned: &DynamicValue) -> Result<Reply> {
        let definition = self.registry.require(type_name)?;
        let provider = self.provider_context()?;
        let lifecycle = Lifecycle::new(&definition, &provider.api, &provider.config.retry);

        let new_state = match (prior.to_tree()?, planned.to_tree()?) {
            (None, None) => None,
            (None, Some(planned)) => {
                let ctx = self.verb_context(&definition, Verb::Create)?;
                Some(lifecycle.create(&ctx, planned).await?.state)
            }
            (Some(prior), Some(planned)) => {
                let ctx = self.verb_context(&definition, Verb::Update)?;
                let prior = ResourceInstance::from_state(&definition, prior);
                Some(lifecycle.update(&ctx, prior, planned).await?.state)
            }
            (Some(prior), None) => {
                let ctx = self.verb_context(&definition, Verb::Delete)?;
                lifecycle
                    .delete(&ctx, ResourceInstance::from_state(&definition, prior))
                    .await?;
                None
            }
        };

        Ok(Reply::ok(Response::Applied {
            new_state: DynamicValue::from_optional_tree(new_state.as_ref()),
        }))
    }

    async fn read(&self, type_name: &str, current: &DynamicValue) -> Result<Reply> {
        let definition = self.registry.require(type_name)?;
        let Some(current) = current.to_tree()? else {
            return Ok(Reply::ok(Response::Read {
                new_state: DynamicValue::null(),
            }));
        };
        let provider = self.provider_context()?;
        let lifecycle = Lifecycle::new(&definition, &provider.api, &provider.config.retry);
        let ctx = self.verb_context(&definition, Verb::Read)?;

        let refreshed = lifecycle
            .read(&ctx, ResourceInstance::from_state(&definition, current))
            .await?;
        Ok(Reply::ok(Response::Read {
            new_state: DynamicValue::from_optional_tree(refreshed.as_ref().map(|i| &i.state)),
        }))
    }

    async fn import(&self, type_name: &str, handle: &str) -> Result<Reply> {
        let definition = self.registry.require(type_name)?;
        let provider = self.provider_context()?;
        let lifecycle = Lifecycle::new(&definition, &provider.api, &provider.config.retry);
        let ctx = self.verb_context(&definition, Verb::Import)?;

        let instance = lifecycle.import(&ctx, handle).await?;
        Ok(Reply::ok(Response::Imported {
            imported_resources: vec![ImportedResource {
                type_name: type_name.to_string(),
                state: DynamicValue::from_tree(&instance.state),
            }],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorContext;
    use crate::identity::ResourceId;
    use crate::attribute::AttributeTree;
    use crate::policy::Policy;
    use crate::resource::{Created, Ownership, ResourceHandler};
    use crate::schema::{Attribute, Schema};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;
    use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};
    use std::sync::Mutex;

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
            Err(TransportError::Other("offline".into()))
        }
    }

    #[derive(Default)]
    struct Rules {
        objects: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl ResourceHandler for Rules {
        async fn create(&self, _: &ApiClient, _: &VerbContext, planned: &AttributeTree) -> Result<Created> {
            let name = planned.get_str("name").unwrap_or_default().to_string();
            self.objects
                .lock()
                .unwrap()
                .insert(format!("id-{name}"), name.clone());
            Ok(Created::Id(format!("id-{name}")))
        }

        async fn read(
            &self,
            _: &ApiClient,
            _: &VerbContext,
            id: &ResourceId,
            state: &mut AttributeTree,
        ) -> Result<Ownership> {
            let name = self
                .objects
                .lock()
                .unwrap()
                .get(id.display_id())
                .cloned()
                .ok_or_else(|| Error::not_found("GET /rules"))?;
            state.set("name", name);
            Ok(Ownership::UserManaged)
        }

        async fn update(
            &self,
            _: &ApiClient,
            _: &VerbContext,
            _: &ResourceId,
            _: &AttributeTree,
            _: &AttributeTree,
        ) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _: &ApiClient, _: &VerbContext, id: &ResourceId, _: &AttributeTree) -> Result<()> {
            self.objects.lock().unwrap().remove(id.display_id());
            Ok(())
        }
    }

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry.register(
            ResourceDefinition::builder("castai_rule", Rules::default())
                .schema(
                    Schema::v0()
                        .with_attribute("name", Attribute::required_string().force_new())
                        .with_attribute("table", Attribute::optional_string())
                        .with_attribute("template_hash", Attribute::optional_string()),
                )
                .policy(Policy::ConflictsWith {
                    first: "table",
                    second: "template_hash",
                })
                .build(),
        );
        registry.register(
            ResourceDefinition::builder("castai_old_rule", Rules::default())
                .schema(Schema::v0().with_attribute("name", Attribute::required_string()))
                .deprecated("castai_old_rule is deprecated, use castai_rule", Some("castai_rule"))
                .build(),
        );
        registry
    }

    fn context() -> ProviderContext {
        ProviderContext {
            config: ProviderConfig {
                api_url: "http://127.0.0.1:9".into(),
                api_token: SecretString::from("t"),
                user_agent: crate::config::user_agent(None),
                request_timeout: std::time::Duration::from_secs(1),
                retry: crate::retry::RetryConfig::default(),
            },
            api: ApiClient::new(Arc::new(Offline)),
        }
    }

    fn json_value(value: serde_json::Value) -> DynamicValue {
        DynamicValue {
            json: Some(value),
            msgpack: None,
        }
    }

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_value(json!({
            "method": "ImportResourceState",
            "params": {"type_name": "castai_rule", "id": "engineering-team"}
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::ImportResourceState {
                type_name: "castai_rule".into(),
                id: "engineering-team".into()
            }
        );

        let request: Request = serde_json::from_value(json!({"method": "GetProviderSchema"})).unwrap();
        assert_eq!(request, Request::GetProviderSchema);
    }

    #[tokio::test]
    async fn test_provider_schema_lists_types() {
        let dispatcher = Dispatcher::new(registry());
        let reply = dispatcher.dispatch(Request::GetProviderSchema).await;
        let Some(Response::ProviderSchema {
            provider,
            resource_schemas,
        }) = reply.result
        else {
            panic!("expected provider schema");
        };
        assert!(resource_schemas.contains_key("castai_rule"));
        assert!(provider["attributes"].is_array());
    }

    #[tokio::test]
    async fn test_plan_policy_error_is_diagnostic() {
        let dispatcher = Dispatcher::new(registry());
        let reply = dispatcher
            .dispatch(Request::PlanResourceChange {
                type_name: "castai_rule".into(),
                prior_state: DynamicValue::null(),
                proposed_new_state: json_value(json!({"name": "r", "table": "users", "template_hash": "abc"})),
                prior_tainted: false,
            })
            .await;
        assert!(reply.result.is_none());
        assert_eq!(reply.diagnostics.len(), 1);
        assert_eq!(
            reply.diagnostics[0].summary,
            "Invalid configuration: only one of table or template_hash can be specified"
        );
        assert_eq!(reply.diagnostics[0].attribute_path.as_deref(), Some("template_hash"));
    }

    #[tokio::test]
    async fn test_plan_deprecated_type_warns() {
        let dispatcher = Dispatcher::new(registry());
        let reply = dispatcher
            .dispatch(Request::PlanResourceChange {
                type_name: "castai_old_rule".into(),
                prior_state: DynamicValue::null(),
                proposed_new_state: json_value(json!({"name": "r"})),
                prior_tainted: false,
            })
            .await;
        assert!(reply.result.is_some());
        assert_eq!(reply.diagnostics[0].severity, DiagnosticSeverity::Warning);
    }

    #[tokio::test]
    async fn test_tainted_prior_plans_replacement() {
        let dispatcher = Dispatcher::new(registry());
        let plan = |tainted| Request::PlanResourceChange {
            type_name: "castai_rule".into(),
            prior_state: json_value(json!({"id": "r-1", "name": "r", "table": "users"})),
            proposed_new_state: json_value(json!({"id": "r-1", "name": "r", "table": "users"})),
            prior_tainted: tainted,
        };

        let Some(Response::Planned { requires_replace, .. }) = dispatcher.dispatch(plan(false)).await.result else {
            panic!("expected a plan");
        };
        assert!(requires_replace.is_empty());

        let Some(Response::Planned { requires_replace, .. }) = dispatcher.dispatch(plan(true)).await.result else {
            panic!("expected a plan");
        };
        assert_eq!(requires_replace, vec!["id".to_string()]);
    }

    #[test]
    fn test_taint_defaults_to_false_on_the_wire() {
        let request: Request = serde_json::from_value(json!({
            "method": "PlanResourceChange",
            "params": {"type_name": "castai_rule", "prior_state": {"json": {"id": "r-1"}}}
        }))
        .unwrap();
        assert!(matches!(
            request,
            Request::PlanResourceChange {
                prior_tainted: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_and_unconfigured() {
        let dispatcher = Dispatcher::new(registry());
        let reply = dispatcher
            .dispatch(Request::ReadResource {
                type_name: "castai_nope".into(),
                current_state: json_value(json!({"id": "x"})),
            })
            .await;
        assert_eq!(reply.diagnostics[0].code.as_deref(), Some("castai_engine::unknown_resource_type"));

        let reply = dispatcher
            .dispatch(Request::ReadResource {
                type_name: "castai_rule".into(),
                current_state: json_value(json!({"id": "x", "name": "r"})),
            })
            .await;
        assert_eq!(reply.diagnostics[0].code.as_deref(), Some("castai_engine::not_configured"));
    }

    #[tokio::test]
    async fn test_configure_without_token_fails() {
        let dispatcher = Dispatcher::new(registry());
        temp_env::async_with_vars([("CASTAI_API_TOKEN", None::<&str>)], async {
            let reply = dispatcher
                .dispatch(Request::ConfigureProvider {
                    config: json_value(json!({})),
                })
                .await;
            assert!(reply.has_errors());
            assert_eq!(reply.diagnostics[0].code.as_deref(), Some("castai_engine::missing_api_token"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_apply_create_read_delete() {
        let dispatcher = Dispatcher::with_context(registry(), context());

        let reply = dispatcher
            .dispatch(Request::ApplyResourceChange {
                type_name: "castai_rule".into(),
                prior_state: DynamicValue::null(),
                planned_state: json_value(json!({"name": "r"})),
            })
            .await;
        let Some(Response::Applied { new_state }) = reply.result else {
            panic!("expected applied: {:?}", reply.diagnostics);
        };
        let state = new_state.to_tree().unwrap().unwrap();
        assert_eq!(state.id(), Some("id-r"));

        let reply = dispatcher
            .dispatch(Request::ReadResource {
                type_name: "castai_rule".into(),
                current_state: DynamicValue::from_tree(&state),
            })
            .await;
        assert_eq!(
            reply.result,
            Some(Response::Read {
                new_state: DynamicValue::from_tree(&state)
            })
        );

        let reply = dispatcher
            .dispatch(Request::ApplyResourceChange {
                type_name: "castai_rule".into(),
                prior_state: DynamicValue::from_tree(&state),
                planned_state: DynamicValue::null(),
            })
            .await;
        assert_eq!(
            reply.result,
            Some(Response::Applied {
                new_state: DynamicValue::null()
            })
        );

        let reply = dispatcher
            .dispatch(Request::ReadResource {
                type_name: "castai_rule".into(),
                current_state: DynamicValue::from_tree(&state),
            })
            .await;
        assert_eq!(
            reply.result,
            Some(Response::Read {
                new_state: DynamicValue::null()
            })
        );
    }

    #[tokio::test]
    async fn test_stop_cancels_later_verbs() {
        let dispatcher = Dispatcher::with_context(registry(), context());
        dispatcher.dispatch(Request::StopProvider).await;
        assert!(dispatcher.is_stopped());

        let reply = dispatcher
            .dispatch(Request::ApplyResourceChange {
                type_name: "castai_rule".into(),
                prior_state: DynamicValue::null(),
                planned_state: json_value(json!({"name": "r"})),
            })
            .await;
        assert!(reply.result.is_none());
        assert_eq!(reply.diagnostics[0].code.as_deref(), Some("castai_engine::cancelled"));
    }

    #[test]
    fn test_diagnostic_from_upstream_error() {
        let err = Error::fatal(
            ErrorContext::for_endpoint("GET /v1/groups/g-1").with_status(500),
            "unexpected status",
        )
        .in_resource("castai_organization_group", Some("g-1"));
        let diagnostics = Diagnostic::from_error(err);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.contains("castai_organization_group g-1"));
        assert!(diagnostics[0].detail.contains("status 500"));
        assert_eq!(diagnostics[0].code.as_deref(), Some("castai_engine::upstream_failed"));
    }
}
