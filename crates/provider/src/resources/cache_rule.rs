//! `castai_cache_rule`: TTL override of a cache configuration.
//!
//! A rule targets either a table or a query template hash, never both.
//! Rules live under a configuration, so the identifier is composite:
//! `<cache_group_id>/<cache_configuration_id>/<rule id>`.

use castai_engine::classify::require_field;
use castai_engine::pagination::find_in_pages;
use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributeTree, ConflictStrategy, Created, Expect,
    IdentityStrategy, Ownership, Policy, ResourceDefinition, ResourceHandler, ResourceId, Result,
    Schema, Validator, VerbContext, async_trait,
};
use serde::{Deserialize, Serialize};

use super::{api_codec, parent, required_str, sparse_codec};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_cache_rule";

const PARENTS: &[&str] = &["cache_group_id", "cache_configuration_id"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_hash: Option<String>,
    ttl_seconds: i64,
}

impl CacheRule {
    fn key(&self) -> Option<&str> {
        self.table.as_deref().or(self.template_hash.as_deref())
    }
}

fn schema() -> Schema {
    Schema::v0()
        .describe("TTL rule for a table or a query template of a cache configuration")
        .with_attribute("cache_group_id", Attribute::required_string().force_new())
        .with_attribute("cache_configuration_id", Attribute::required_string().force_new())
        .with_attribute("table", Attribute::optional_string().force_new())
        .with_attribute(
            "template_hash",
            Attribute::optional_string()
                .force_new()
                .describe("Hash of a normalised query template"),
        )
        .with_attribute(
            "ttl_seconds",
            Attribute::required_int().validate(Validator::IntRange { min: 0, max: 31_536_000 }),
        )
        .with_id()
}

fn rules_path(group_id: &str, configuration_id: &str) -> String {
    format!("/v1/dbo/cache-groups/{group_id}/cache-configurations/{configuration_id}/ttls")
}

fn rule_path(id: &ResourceId) -> Result<String> {
    let group_id = parent(id, 0, "cache_group_id")?;
    let configuration_id = parent(id, 1, "cache_configuration_id")?;
    Ok(format!("{}/{}", rules_path(group_id, configuration_id), id.display_id()))
}

struct CacheRules;

#[async_trait]
impl ResourceHandler for CacheRules {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let path = rules_path(
            required_str(planned, "cache_group_id")?,
            required_str(planned, "cache_configuration_id")?,
        );
        let body: CacheRule = sparse_codec(&schema).decode(planned)?;
        let created: CacheRule = api
            .call_json(
                ctx,
                ApiRequest::post(&path).json(&body)?,
                Expect::Ok,
                ConflictStrategy::StatusOrBody.detection(),
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
        let rule: CacheRule = api.get_json(ctx, rule_path(id)?).await?;
        api_codec(&schema()).encode(&rule, state)?;
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
        let mut body: CacheRule = sparse_codec(&schema).decode(planned)?;
        body.id = id.display_id().to_string();
        api.call(ctx, ApiRequest::put(rule_path(id)?).json(&body)?, Expect::Ok)
            .await?;
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        api.call(ctx, ApiRequest::delete(rule_path(id)?), Expect::NoContent)
            .await?;
        Ok(())
    }

    /// Matches the table name or the template hash.
    async fn find_by_name(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        parents: &[String],
        name: &str,
    ) -> Result<Option<String>> {
        let [group_id, configuration_id] = parents else {
            return Ok(None);
        };
        let path = rules_path(group_id, configuration_id);
        let found = find_in_pages(
            |page| api.get_page::<CacheRule>(ctx, &path, page),
            |rule| rule.key() == Some(name),
        )
        .await?;
        Ok(found.map(|rule| rule.id))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        planned
            .get_non_empty_str("table")
            .or_else(|| planned.get_non_empty_str("template_hash"))
            .map(str::to_string)
    }
}

/// Definition of `castai_cache_rule`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, CacheRules)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .parents(PARENTS)
        .conflicts(ConflictStrategy::StatusOrBody)
        .policy(Policy::ConflictsWith {
            first: "table",
            second: "template_hash",
        })
        .policy(Policy::AtLeastOneOf(&["table", "template_hash"]))
        .build()
}
