//! `castai_cache_configuration`: database cache settings of a cache group.
//!
//! The API creates a configuration for every database it discovers, so
//! create looks for an existing configuration of the same database first and
//! adopts it instead of posting a duplicate.

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
pub const TYPE_NAME: &str = "castai_cache_configuration";

const MODES: &[&str] = &["Auto", "DontCache", "Manual"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    database_name: String,
    mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manual_ttl: Option<i64>,
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Cache settings of one database behind a cache group")
        .with_attribute(
            "cache_group_id",
            Attribute::required_string().force_new().validate(Validator::NotEmpty),
        )
        .with_attribute("database_name", Attribute::required_string().force_new())
        .with_attribute(
            "mode",
            Attribute::required_string()
                .validate(Validator::OneOf(MODES))
                .describe("`Auto`, `DontCache` or `Manual`"),
        )
        .with_attribute(
            "manual_ttl",
            Attribute::optional_int()
                .validate(Validator::IntRange { min: 1, max: 31_536_000 })
                .describe("TTL in seconds, only with `mode = \"Manual\"`"),
        )
        .with_id()
}

fn configurations_path(group_id: &str) -> String {
    format!("/v1/dbo/cache-groups/{group_id}/cache-configurations")
}

fn configuration_path(group_id: &str, id: &str) -> String {
    format!("{}/{id}", configurations_path(group_id))
}

struct CacheConfigurations;

#[async_trait]
impl ResourceHandler for CacheConfigurations {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let group_id = required_str(planned, "cache_group_id")?;
        let path = configurations_path(group_id);
        let body: CacheConfiguration = sparse_codec(&schema).decode(planned)?;
        let created: CacheConfiguration = api
            .call_json(
                ctx,
                ApiRequest::post(&path).json(&body)?,
                Expect::Ok,
                ConflictStrategy::ListFirst.detection(),
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
        let group_id = parent(id, 0, "cache_group_id")?;
        let configuration: CacheConfiguration = api
            .get_json(ctx, configuration_path(group_id, id.display_id()))
            .await?;
        if configuration.manual_ttl.is_none() {
            state.remove("manual_ttl");
        }
        api_codec(&schema()).encode(&configuration, state)?;
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
        let group_id = parent(id, 0, "cache_group_id")?;
        let mut body: CacheConfiguration = sparse_codec(&schema).decode(planned)?;
        body.id = id.display_id().to_string();
        api.call(
            ctx,
            ApiRequest::put(configuration_path(group_id, id.display_id())).json(&body)?,
            Expect::Ok,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        let group_id = parent(id, 0, "cache_group_id")?;
        api.call(
            ctx,
            ApiRequest::delete(configuration_path(group_id, id.display_id())),
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
        let Some(group_id) = parents.first() else {
            return Ok(None);
        };
        let path = configurations_path(group_id);
        let found = find_in_pages(
            |page| api.get_page::<CacheConfiguration>(ctx, &path, page),
            |configuration| configuration.database_name == name,
        )
        .await?;
        Ok(found.map(|configuration| configuration.id))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        required_str(planned, "database_name").ok().map(str::to_string)
    }
}

/// Definition of `castai_cache_configuration`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, CacheConfigurations)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .parents(&["cache_group_id"])
        .conflicts(ConflictStrategy::ListFirst)
        .policy(Policy::RequiredWhen {
            attribute: "manual_ttl",
            when: "mode",
            equals: "Manual",
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use castai_engine::plan_change;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> AttributeTree {
        AttributeTree::from_json(value).unwrap()
    }

    #[test]
    fn test_manual_ttl_only_with_manual_mode() {
        let definition = definition();

        let missing = tree(json!({"cache_group_id": "g", "database_name": "db", "mode": "Manual"}));
        let errors = plan_change(&definition, None, missing).unwrap_err().into_flat();
        assert!(errors[0].to_string().contains("manual_ttl is required when mode is Manual"));

        let stray = tree(json!({"cache_group_id": "g", "database_name": "db", "mode": "Auto", "manual_ttl": 60}));
        let errors = plan_change(&definition, None, stray).unwrap_err().into_flat();
        assert!(errors[0].to_string().contains("manual_ttl can only be set when mode is Manual"));

        let ok = tree(json!({"cache_group_id": "g", "database_name": "db", "mode": "Manual", "manual_ttl": 60}));
        assert!(plan_change(&definition, None, ok).is_ok());
    }

    #[test]
    fn test_body_omits_unset_ttl() {
        let schema = schema();
        let planned = tree(json!({
            "cache_group_id": "cache-group-123",
            "database_name": "test-db",
            "mode": "Auto",
            "manual_ttl": null,
            "id": null
        }));
        let body: CacheConfiguration = sparse_codec(&schema).decode(&planned).unwrap();
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"databaseName": "test-db", "mode": "Auto"})
        );
    }

    #[test]
    fn test_database_change_requires_replace() {
        let definition = definition();
        let prior = tree(json!({"id": "c-1", "cache_group_id": "g", "database_name": "a", "mode": "Auto"}));
        let proposed = tree(json!({"cache_group_id": "g", "database_name": "b", "mode": "Auto"}));
        let outcome = plan_change(&definition, Some(&prior), proposed).unwrap();
        assert_eq!(outcome.requires_replace[0].to_string(), "database_name");
    }
}
