//! `castai_role_bindings`: grants a role to users, service accounts or
//! groups within an organization or a single cluster.

use castai_engine::classify::require_field;
use castai_engine::pagination::find_in_pages;
use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributeTree, ConflictStrategy, Created, Expect,
    IdentityStrategy, Mode, Ownership, Policy, ResourceDefinition, ResourceHandler, ResourceId,
    Result, Schema, Validator, VerbContext, async_trait,
};
use serde::{Deserialize, Serialize};

use super::{api_codec, parent, required_str};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_role_bindings";

const SUBJECT_KINDS: &[&str] = &["user", "service_account", "group"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeTarget {
    id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    organization: Option<ScopeTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cluster: Option<ScopeTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subject {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleBinding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    role_id: String,
    #[serde(default)]
    scope: Scope,
    #[serde(default)]
    subjects: Vec<Subject>,
}

fn target_schema() -> Schema {
    Schema::v0().with_attribute("id", Attribute::required_string())
}

fn scope_schema() -> Schema {
    Schema::v0()
        .with_attribute("organization", Attribute::single_block(target_schema(), Mode::Optional))
        .with_attribute("cluster", Attribute::single_block(target_schema(), Mode::Optional))
}

fn subject_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "kind",
            Attribute::required_string().validate(Validator::OneOf(SUBJECT_KINDS)),
        )
        .with_attribute("user_id", Attribute::optional_string())
        .with_attribute("service_account_id", Attribute::optional_string())
        .with_attribute("group_id", Attribute::optional_string())
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Binds a role to subjects in an organization or cluster scope")
        .with_attribute(
            "organization_id",
            Attribute::required_string().force_new().validate(Validator::Uuid),
        )
        .with_attribute("name", Attribute::required_string())
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("role_id", Attribute::required_string().validate(Validator::Uuid))
        .with_attribute("scope", Attribute::single_block(scope_schema(), Mode::Required))
        .with_attribute("subjects", Attribute::block_list(subject_schema(), Mode::Required))
        .with_id()
}

fn bindings_path(organization_id: &str) -> String {
    format!("/v1/organizations/{organization_id}/role-bindings")
}

fn binding_path(organization_id: &str, id: &str) -> String {
    format!("{}/{id}", bindings_path(organization_id))
}

struct RoleBindings;

#[async_trait]
impl ResourceHandler for RoleBindings {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let path = bindings_path(required_str(planned, "organization_id")?);
        let body: RoleBinding = api_codec(&schema).decode(planned)?;
        let created: RoleBinding = api
            .call_json(
                ctx,
                ApiRequest::post(&path).json(&body)?,
                Expect::Ok,
                ConflictStrategy::Status.detection(),
            )
            .await?;
        Ok(Created::Id(require_field(Some(created.id), &path, "id")?))
    }

    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership> {
        let organization_id = parent(id, 0, "organization_id")?;
        let binding: RoleBinding = api
            .get_json(ctx, binding_path(organization_id, id.display_id()))
            .await?;
        // a scope switch on the server must not keep the old target
        state.remove("scope");
        api_codec(&schema()).encode(&binding, state)?;
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
        let organization_id = parent(id, 0, "organization_id")?;
        let body: RoleBinding = api_codec(&schema).decode(planned)?;
        api.call(
            ctx,
            ApiRequest::put(binding_path(organization_id, id.display_id())).json(&body)?,
            Expect::Ok,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        let organization_id = parent(id, 0, "organization_id")?;
        api.call(
            ctx,
            ApiRequest::delete(binding_path(organization_id, id.display_id())),
            Expect::NoContent,
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
        let Some(organization_id) = parents.first() else {
            return Ok(None);
        };
        let path = bindings_path(organization_id);
        let found = find_in_pages(
            |page| api.get_page::<RoleBinding>(ctx, &path, page),
            |binding| binding.name == name,
        )
        .await?;
        Ok(found.map(|binding| binding.id))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        required_str(planned, "name").ok().map(str::to_string)
    }
}

/// Definition of `castai_role_bindings`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, RoleBindings)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .parents(&["organization_id"])
        .conflicts(ConflictStrategy::Status)
        .policy(Policy::ExclusiveBlocks {
            members: &["scope.0.organization.0.id", "scope.0.cluster.0.id"],
            message: "scope cannot have both organization and cluster",
        })
        .policy(Policy::AtLeastOneOf(&[
            "scope.0.organization.0.id",
            "scope.0.cluster.0.id",
        ]))
        .build()
}
