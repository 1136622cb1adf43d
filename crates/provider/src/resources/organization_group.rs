//! `castai_organization_group`: a named group of organization members.
//!
//! Groups are addressed by server UUID. Import accepts either the UUID or
//! the group name; names are resolved by walking the paged group list.

use castai_engine::classify::require_field;
use castai_engine::pagination::find_in_pages;
use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributeTree, AttributeValue, ConflictStrategy, Created,
    Expect, IdentityStrategy, Mode, Ownership, Presence, ResourceDefinition, ResourceHandler,
    ResourceId, Result, Schema, Validator, VerbContext, async_trait,
};
use serde::{Deserialize, Serialize};

use super::{api_codec, required_str};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_organization_group";

const GROUPS_PATH: &str = "/v1/groups";

const MEMBER_KINDS: &[&str] = &["user", "service_account"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Member {
    kind: String,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupDefinition {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Group {
    #[serde(default)]
    id: String,
    #[serde(default)]
    organization_id: Option<String>,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(flatten)]
    definition: GroupDefinition,
}

fn member_schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "kind",
            Attribute::required_string()
                .validate(Validator::OneOf(MEMBER_KINDS))
                .describe("Member kind, `user` or `service_account`"),
        )
        .with_attribute("id", Attribute::required_string().describe("Member identifier"))
        .with_attribute("email", Attribute::optional_string().computed())
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Group of organization members used in role bindings")
        .with_attribute("name", Attribute::required_string().validate(Validator::NotEmpty))
        .with_attribute("description", Attribute::optional_string())
        .with_attribute("members", Attribute::block_list(member_schema(), Mode::Optional))
        .with_attribute("organization_id", Attribute::computed_string())
        .with_attribute("create_time", Attribute::computed_string())
        .with_id()
}

fn group_path(id: &str) -> String {
    format!("{GROUPS_PATH}/{id}")
}

struct OrganizationGroup;

#[async_trait]
impl ResourceHandler for OrganizationGroup {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let body: GroupDefinition = api_codec(&schema).decode(planned)?;
        let created: Group = api
            .call_json(
                ctx,
                ApiRequest::post(GROUPS_PATH).json(&body)?,
                Expect::Ok,
                ConflictStrategy::Status.detection(),
            )
            .await?;
        Ok(Created::Id(require_field(Some(created.id), GROUPS_PATH, "id")?))
    }

    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership> {
        let group: Group = api.get_json(ctx, group_path(id.display_id())).await?;
        let had_members = state.presence("members") == Presence::Set;
        api_codec(&schema()).encode(&group, state)?;
        // an empty member list reads back as unset unless the user wrote one
        if group.definition.members.is_empty() && !had_members {
            state.set("members", AttributeValue::Null);
        }
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
        let body: GroupDefinition = api_codec(&schema).decode(planned)?;
        api.call(
            ctx,
            ApiRequest::put(group_path(id.display_id())).json(&body)?,
            Expect::Ok,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        api.call(ctx, ApiRequest::delete(group_path(id.display_id())), Expect::NoContent)
            .await?;
        Ok(())
    }

    async fn find_by_name(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        _parents: &[String],
        name: &str,
    ) -> Result<Option<String>> {
        let found = find_in_pages(
            |page| api.get_page::<Group>(ctx, GROUPS_PATH, page),
            |group| group.definition.name == name,
        )
        .await?;
        Ok(found.map(|group| group.id))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        required_str(planned, "name").ok().map(str::to_string)
    }
}

/// Definition of `castai_organization_group`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, OrganizationGroup)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .conflicts(ConflictStrategy::Status)
        .build()
}
