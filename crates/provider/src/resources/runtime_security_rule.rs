//! `castai_runtime_security_rule`: a runtime detection rule.
//!
//! The create call does not return the new rule, so the identifier is found
//! by name afterwards. Built-in rules cannot be deleted; destroying one
//! disables it through the toggle endpoint.

use std::collections::BTreeMap;

use castai_engine::normalize::trim_trailing_whitespace;
use castai_engine::pagination::find_in_pages;
use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributePath, AttributeTree, ConflictStrategy, Created,
    Error, Expect, IdentityStrategy, Ownership, PlanContext, Policy, ResourceDefinition,
    ResourceHandler, ResourceId, Result, Schema, Validator, VerbContext, async_trait,
};
use serde::{Deserialize, Serialize};

use super::{api_codec, required_str};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_runtime_security_rule";

const RULES_PATH: &str = "/v1/security/runtime/rules";
const TOGGLE_PATH: &str = "/v1/security/runtime/rules:toggle";
const DELETE_PATH: &str = "/v1/security/runtime/rules:delete";

const SEVERITIES: &[&str] = &[
    "SEVERITY_LOW",
    "SEVERITY_MEDIUM",
    "SEVERITY_HIGH",
    "SEVERITY_CRITICAL",
];

const RULE_ENGINES: &[&str] = &["RULE_ENGINE_TYPE_CEL", "RULE_ENGINE_TYPE_JQ"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleDefinition {
    name: String,
    category: String,
    severity: String,
    rule_text: String,
    rule_engine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_selector: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rule {
    #[serde(default)]
    id: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    is_built_in: bool,
    #[serde(default)]
    used_custom_lists: Vec<String>,
    #[serde(flatten)]
    definition: RuleDefinition,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Toggle<'a> {
    enabled: bool,
    ids: [&'a str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRules<'a> {
    ids: [&'a str; 1],
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Runtime security detection rule")
        .with_attribute("name", Attribute::required_string().force_new())
        .with_attribute("category", Attribute::required_string())
        .with_attribute(
            "severity",
            Attribute::required_string().validate(Validator::OneOf(SEVERITIES)),
        )
        .with_attribute(
            "rule_text",
            Attribute::required_string()
                .validate(Validator::NotEmpty)
                .describe("Rule expression; trailing whitespace is ignored"),
        )
        .with_attribute(
            "rule_engine_type",
            Attribute::optional_string()
                .with_default("RULE_ENGINE_TYPE_CEL")
                .validate(Validator::OneOf(RULE_ENGINES)),
        )
        .with_attribute("resource_selector", Attribute::optional_string())
        .with_attribute("labels", Attribute::optional_string_map())
        .with_attribute("enabled", Attribute::optional_bool().with_default(true))
        .with_attribute("is_built_in", Attribute::computed_bool())
        .with_attribute(
            "used_custom_lists",
            Attribute::optional_string_list().computed(),
        )
        .with_id()
}

fn rule_path(id: &str) -> String {
    format!("{RULES_PATH}/{id}")
}

/// Built-in rules only accept enabling and disabling.
fn built_in_is_frozen(ctx: &mut PlanContext<'_>) -> Result<()> {
    let built_in = ctx
        .prior
        .and_then(|prior| prior.get_bool("is_built_in"))
        .unwrap_or(false);
    if !built_in {
        return Ok(());
    }
    for attribute in ["category", "severity", "rule_text", "rule_engine_type", "resource_selector"] {
        if ctx.has_change(attribute) {
            return Err(Error::config_invalid_at(
                AttributePath::attr(attribute),
                format!("{attribute} of a built-in rule cannot be changed"),
            ));
        }
    }
    Ok(())
}

async fn toggle(api: &ApiClient, ctx: &VerbContext, id: &str, enabled: bool) -> Result<()> {
    let body = Toggle { enabled, ids: [id] };
    api.call(ctx, ApiRequest::post(TOGGLE_PATH).json(&body)?, Expect::Ok)
        .await?;
    Ok(())
}

struct RuntimeSecurityRule;

#[async_trait]
impl ResourceHandler for RuntimeSecurityRule {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        let schema = schema();
        let mut body: RuleDefinition = api_codec(&schema).decode(planned)?;
        body.rule_text = trim_trailing_whitespace(&body.rule_text);
        api.call_with(
            ctx,
            ApiRequest::post(RULES_PATH).json(&body)?,
            Expect::Ok,
            ConflictStrategy::Status.detection(),
        )
        .await?;

        if planned.get_bool("enabled") == Some(false) {
            let id = self
                .find_by_name(api, ctx, &[], &body.name)
                .await?
                .ok_or_else(|| Error::not_found(RULES_PATH))?;
            toggle(api, ctx, &id, false).await?;
            return Ok(Created::Id(id));
        }
        Ok(Created::Name(body.name))
    }

    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership> {
        let rule: Rule = api.get_json(ctx, rule_path(id.display_id())).await?;
        api_codec(&schema()).encode(&rule, state)?;
        Ok(if rule.is_built_in {
            Ownership::BuiltIn
        } else {
            Ownership::UserManaged
        })
    }

    async fn update(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        prior: &AttributeTree,
        planned: &AttributeTree,
    ) -> Result<()> {
        let schema = schema();
        let built_in = prior.get_bool("is_built_in").unwrap_or(false);
        let changes = schema.user_changes(prior, planned);
        // no visible change means an adopted rule whose remote body is unknown
        let definition_changed = changes.is_empty()
            || changes
                .iter()
                .any(|change| change.path.root_attribute() != Some("enabled"));

        if definition_changed && !built_in {
            let mut body: RuleDefinition = api_codec(&schema).decode(planned)?;
            body.rule_text = trim_trailing_whitespace(&body.rule_text);
            api.call(
                ctx,
                ApiRequest::put(rule_path(id.display_id())).json(&body)?,
                Expect::Ok,
            )
            .await?;
        }

        let enabled = planned.get_bool("enabled").unwrap_or(true);
        if prior.get_bool("enabled") != Some(enabled) {
            toggle(api, ctx, id.display_id(), enabled).await?;
        }
        Ok(())
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        let body = DeleteRules { ids: [id.display_id()] };
        api.call(ctx, ApiRequest::post(DELETE_PATH).json(&body)?, Expect::Ok)
            .await?;
        Ok(())
    }

    async fn disable(&self, api: &ApiClient, ctx: &VerbContext, id: &ResourceId, _state: &AttributeTree) -> Result<()> {
        toggle(api, ctx, id.display_id(), false).await
    }

    async fn find_by_name(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        _parents: &[String],
        name: &str,
    ) -> Result<Option<String>> {
        let found = find_in_pages(
            |page| api.get_page::<Rule>(ctx, RULES_PATH, page),
            |rule| rule.definition.name == name,
        )
        .await?;
        Ok(found.map(|rule| rule.id))
    }

    fn natural_key(&self, planned: &AttributeTree) -> Option<String> {
        required_str(planned, "name").ok().map(str::to_string)
    }

    fn ownership(&self, state: &AttributeTree) -> Option<Ownership> {
        state.get_bool("is_built_in").map(|built_in| {
            if built_in {
                Ownership::BuiltIn
            } else {
                Ownership::UserManaged
            }
        })
    }

    fn normalize(&self, state: &mut AttributeTree) {
        if let Some(text) = state.get_str("rule_text").map(trim_trailing_whitespace) {
            state.set("rule_text", text);
        }
    }
}

/// Definition of `castai_runtime_security_rule`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, RuntimeSecurityRule)
        .schema(schema())
        .identity(IdentityStrategy::SearchByName)
        .conflicts(ConflictStrategy::Status)
        .policy(Policy::Custom(built_in_is_frozen))
        .build()
}
