//! `castai_node_template`: autoscaler node template of a cluster.
//!
//! Templates are keyed by name within their cluster. Every cluster ships a
//! `default-by-castai` template that can be configured but never deleted; it
//! is handled as a default singleton.

use std::collections::BTreeMap;

use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributePath, AttributeTree, ConflictStrategy, Created,
    Error, Expect, IdentityStrategy, Mode, Ownership, PlanContext, Policy, ResourceDefinition,
    ResourceHandler, ResourceId, Result, Schema, Validator, VerbContext, async_trait,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{api_codec, parent, required_str};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_node_template";

/// Name of the template every cluster is provisioned with.
pub const DEFAULT_TEMPLATE: &str = "default-by-castai";

const TAINT_EFFECTS: &[&str] = &["NoSchedule", "NoExecute"];
const ARCHITECTURES: &[&str] = &["amd64", "arm64"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Taint {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    effect: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_demand: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    use_spot_fallbacks: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback_restore_rate_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_cpu: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_cpu: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    architectures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_gpu_only: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeTemplate {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_default: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configuration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    should_taint: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    custom_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    custom_taints: Vec<Taint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    constraints: Option<Constraints>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    template: NodeTemplate,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    #[serde(default)]
    items: Vec<ListItem>,
}

fn taint_schema() -> Schema {
    Schema::v0()
        .with_attribute("key", Attribute::required_string())
        .with_attribute("value", Attribute::optional_string())
        .with_attribute(
            "effect",
            Attribute::optional_string()
                .with_default("NoSchedule")
                .validate(Validator::OneOf(TAINT_EFFECTS)),
        )
}

fn constraints_schema() -> Schema {
    Schema::v0()
        .with_attribute("spot", Attribute::optional_bool())
        .with_attribute("on_demand", Attribute::optional_bool())
        .with_attribute("use_spot_fallbacks", Attribute::optional_bool())
        .with_attribute(
            "fallback_restore_rate_seconds",
            Attribute::optional_int().validate(Validator::IntRange { min: 0, max: 86_400 }),
        )
        .with_attribute("min_cpu", Attribute::optional_int())
        .with_attribute("max_cpu", Attribute::optional_int())
        .with_attribute("min_memory", Attribute::optional_int().describe("MiB"))
        .with_attribute("max_memory", Attribute::optional_int().describe("MiB"))
        .with_attribute(
            "architectures",
            Attribute::optional_string_list().validate(Validator::OneOf(ARCHITECTURES)),
        )
        .with_attribute("is_gpu_only", Attribute::optional_bool())
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Node template used by the autoscaler to provision nodes")
        .with_attribute("cluster_id", Attribute::required_string().force_new())
        .with_attribute("name", Attribute::required_string().force_new())
        .with_attribute("is_default", Attribute::optional_bool().computed())
        .with_attribute("is_enabled", Attribute::optional_bool().with_default(true))
        .with_attribute(
            "configuration_id",
            Attribute::optional_string().validate(Validator::Uuid),
        )
        .with_attribute("should_taint", Attribute::optional_bool().with_default(true))
        .with_attribute("custom_labels", Attribute::optional_string_map())
        .with_attribute("custom_taints", Attribute::block_list(taint_schema(), Mode::Optional))
        .with_attribute(
            "constraints",
            Attribute::single_block(constraints_schema(), Mode::Optional),
        )
        .with_id()
}

/// Lower bounds of the constraints may not exceed their upper bounds.
fn bounds_are_ordered(ctx: &mut PlanContext<'_>) -> Result<()> {
    for (min, max) in [("min_cpu", "max_cpu"), ("min_memory", "max_memory")] {
        let low = ctx.planned_value(&format!("constraints.0.{min}")).as_i64();
        let high = ctx.planned_value(&format!("constraints.0.{max}")).as_i64();
        if let (Some(low), Some(high)) = (low, high)
            && high > 0
            && low > high
        {
            return Err(Error::config_invalid_at(
                AttributePath::parse(&format!("constraints.0.{min}")),
                format!("{min} ({low}) must not exceed {max} ({high})"),
            ));
        }
    }
    Ok(())
}

fn templates_path(cluster_id: &str) -> String {
    format!("/v1/kubernetes/clusters/{cluster_id}/node-templates")
}

fn template_path(cluster_id: &str, name: &str) -> String {
    format!("{}/{name}", templates_path(cluster_id))
}

async fn list(api: &ApiClient, ctx: &VerbContext, cluster_id: &str) -> Result<Vec<NodeTemplate>> {
    let request = ApiRequest::get(templates_path(cluster_id)).query("includeDefault", "true");
    let list: TemplateList = api
        .call_json(ctx, request, Expect::Ok, ConflictStrategy::Status.detection())
        .await?;
    Ok(list.items.into_iter().map(|item| item.template).collect())
}

struct NodeTemplates;

#[async_trait]
impl ResourceHandler for NodeTemplates {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let cluster_id = required_str(planned, "cluster_id")?;
        let body: NodeTemplate = api_codec(&schema).decode(planned)?;
        let created: NodeTemplate = api
            .call_json(
                ctx,
                ApiRequest::post(templates_path(cluster_id)).json(&body)?,
                Expect::Ok,
                ConflictStrategy::Status.detection(),
            )
            .await?;
        debug!(cluster_id, name = %created.name, "Node template created");
        Ok(Created::Id(body.name))
    }

    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership> {
        let cluster_id = parent(id, 0, "cluster_id")?;
        let name = id.display_id();
        let template = list(api, ctx, cluster_id)
            .await?
            .into_iter()
            .find(|template| template.name == name)
            .ok_or_else(|| Error::not_found(template_path(cluster_id, name)))?;
        api_codec(&schema()).encode(&template, state)?;
        Ok(Ownership::UserManaged)
    }

    async fn update(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        _prior: &AttributeTree,
        planned: &AttributeTree,
    ) -> Result<()> {
        let schema = schema();
        let cluster_id = parent(id, 0, "cluster_id")?;
        let body: NodeTemplate = api_codec(&schema).decode(planned)?;
        api.call(
            ctx,
            ApiRequest::put(template_path(cluster_id, id.display_id())).json(&body)?,
            Expect::Ok,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        let cluster_id = parent(id, 0, "cluster_id")?;
        api.call(
            ctx,
            ApiRequest::delete(template_path(cluster_id, id.display_id())),
            Expect::Ok,
        )
        .await?;
        Ok(())
    }

    async fn find_by_name(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        parents: &[String],
        name: &str,
    ) -> Result<Option<String>> {
        let cluster_id = parents
            .first()
            .ok_or_else(|| Error::config_invalid("cluster_id must be set"))?;
        Ok(list(api, ctx, cluster_id)
            .await?
            .into_iter()
            .find(|template| template.name == name)
            .map(|template| template.name))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        required_str(planned, "name").ok().map(str::to_string)
    }
}

/// Definition of `castai_node_template`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, NodeTemplates)
        .schema(schema())
        .identity(IdentityStrategy::NameKey)
        .parents(&["cluster_id"])
        .conflicts(ConflictStrategy::Status)
        .default_singleton("name", DEFAULT_TEMPLATE)
        .policy(Policy::Custom(bounds_are_ordered))
        .build()
}
