//! `castai_reservations`: the older Azure-only reservations import.
//!
//! It writes the same remote records as `castai_commitments` with an Azure
//! CSV. To move over, remove the resource from state and import the
//! organization id as `castai_commitments`.

use castai_engine::{
    ApiClient, Attribute, AttributeTree, AttributeValue, ConflictStrategy, Created, Error,
    IdentityStrategy, Mode, Ownership, Policy, ResourceDefinition, ResourceHandler, ResourceId,
    Result, Schema, Validator, VerbContext, async_trait,
};

use super::commitments::{
    self, Cloud, azure_record_schema, azure_records_of, current_organization, delete_matching,
    derive_azure, import_azure, list_commitments, parse_azure_csv, state_keys,
};

/// Resource type name.
pub const TYPE_NAME: &str = "castai_reservations";

const DEPRECATION: &str =
    "castai_reservations is deprecated, use castai_commitments with azure_reservations_csv instead";

fn schema() -> Schema {
    Schema::v0()
        .describe("Azure reservations imported into CAST AI savings")
        .with_attribute(
            "reservations_csv",
            Attribute::required_string()
                .validate(Validator::NotEmpty)
                .describe("Azure portal reservations export"),
        )
        .with_attribute("organization_id", Attribute::computed_string())
        .with_attribute(
            "reservations",
            Attribute::block_list(azure_record_schema(), Mode::Computed),
        )
        .with_id()
}

fn derive_reservations(planned: &AttributeTree) -> Result<Option<AttributeValue>> {
    derive_azure(planned, "reservations_csv")
}

struct Reservations;

impl Reservations {
    async fn upload(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<()> {
        let csv = planned
            .get_non_empty_str("reservations_csv")
            .ok_or_else(|| Error::config_invalid("reservations_csv must be set"))?;
        import_azure(api, ctx, &parse_azure_csv(csv)?).await
    }
}

#[async_trait]
impl ResourceHandler for Reservations {
    async fn create(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<Created> {
        self.upload(api, ctx, planned).await?;
        Ok(Created::Id(current_organization(api, ctx).await?))
    }

    async fn read(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        id: &ResourceId,
        state: &mut AttributeTree,
    ) -> Result<Ownership> {
        let azure: Vec<_> = list_commitments(api, ctx)
            .await?
            .into_iter()
            .filter(|commitment| commitment.cloud() == Some(Cloud::Azure))
            .collect();
        if azure.is_empty() {
            return Err(Error::not_found(commitments::COMMITMENTS_PATH));
        }
        state.set("reservations", azure_records_of(&azure)?);
        state.set("organization_id", id.display_id());
        Ok(Ownership::UserManaged)
    }

    async fn update(
        &self,
        api: &ApiClient,
        ctx: &VerbContext,
        _id: &ResourceId,
        _prior: &AttributeTree,
        planned: &AttributeTree,
    ) -> Result<()> {
        self.upload(api, ctx, planned).await
    }

    async fn delete(&self, api: &ApiClient, ctx: &VerbContext, _id: &ResourceId, state: &AttributeTree) -> Result<()> {
        let keys = state_keys(state, "reservations", "reservation_id");
        delete_matching(api, ctx, Cloud::Azure, &keys).await
    }
}

/// Definition of `castai_reservations`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, Reservations)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .conflicts(ConflictStrategy::Surface)
        .policy(Policy::Derive {
            target: "reservations",
            compute: derive_reservations,
        })
        .deprecated(DEPRECATION, Some(commitments::TYPE_NAME))
        .build()
}
