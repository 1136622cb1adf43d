//! `castai_commitments`: cloud commitments imported into CAST AI savings.
//!
//! Users paste either the `gcloud compute commitments list --format=json`
//! output or an Azure reservations CSV export. The input is parsed at plan
//! time into sorted records, so a reordered export does not show up as a
//! change. The resource is a per-organization singleton, keyed by the
//! organization id.

use std::collections::BTreeSet;

use castai_engine::normalize::sort_records_by;
use castai_engine::{
    ApiClient, ApiRequest, Attribute, AttributeTree, AttributeType, AttributeValue,
    ConflictStrategy, Created, Error, Expect, IdentityStrategy, Mode, Ownership, Policy,
    ResourceDefinition, ResourceHandler, ResourceId, Result, Schema, Validator, VerbContext,
    async_trait,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Resource type name.
pub const TYPE_NAME: &str = "castai_commitments";

pub(crate) const COMMITMENTS_PATH: &str = "/savings/v1beta/commitments";
const IMPORT_GCP_PATH: &str = "/savings/v1beta/commitments:importGCP";
const IMPORT_AZURE_PATH: &str = "/savings/v1beta/commitments:importAzure";
const ORGANIZATIONS_PATH: &str = "/v1/organizations";

/// Cloud a commitment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cloud {
    Gcp,
    Azure,
}

/// One GCP committed use discount as printed by gcloud.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpCud {
    name: String,
    region: String,
    #[serde(default)]
    plan: String,
    #[serde(default, rename = "type")]
    cud_type: String,
    start_timestamp: String,
    end_timestamp: String,
    #[serde(default)]
    resources: Vec<GcpCudResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct GcpCudResource {
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(deserialize_with = "int_or_string")]
    amount: i64,
}

/// One row of an Azure reservations export.
#[derive(Debug, Clone, Deserialize)]
struct AzureReservationRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Reservation Id")]
    reservation_id: String,
    #[serde(rename = "Expiry date")]
    expiry_date: String,
    #[serde(rename = "Purchase date")]
    purchase_date: String,
    #[serde(rename = "Term", default)]
    term: String,
    #[serde(rename = "Scope", default)]
    scope: String,
    #[serde(rename = "Product name")]
    product_name: String,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Quantity", deserialize_with = "int_or_string")]
    quantity: i64,
}

/// Normalised GCP commitment as stored in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct GcpRecord {
    name: String,
    region: String,
    plan: String,
    #[serde(rename = "type")]
    cud_type: String,
    start_timestamp: String,
    end_timestamp: String,
    cpu: i64,
    memory_mb: i64,
}

/// Normalised Azure reservation as stored in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct AzureRecord {
    reservation_id: String,
    name: String,
    region: String,
    product_name: String,
    quantity: i64,
    term: String,
    scope: String,
    start_timestamp: String,
    end_timestamp: String,
}

/// Commitment as listed by the savings API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Commitment {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    end_date: String,
    #[serde(default)]
    gcp_resource_cud_context: Option<GcpContext>,
    #[serde(default)]
    azure_reservation_context: Option<AzureContext>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpContext {
    #[serde(default, deserialize_with = "int_or_string")]
    cpu: i64,
    #[serde(default, deserialize_with = "int_or_string")]
    memory_mb: i64,
    #[serde(default)]
    plan: String,
    #[serde(default, rename = "type")]
    cud_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureContext {
    id: String,
    #[serde(default)]
    product_name: String,
    #[serde(default, deserialize_with = "int_or_string")]
    quantity: i64,
    #[serde(default)]
    term: String,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct CommitmentList {
    #[serde(default)]
    commitments: Vec<Commitment>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OrganizationList {
    #[serde(default)]
    organizations: Vec<Organization>,
}

/// Azure import payload entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AzureImport<'a> {
    reservation_id: &'a str,
    name: &'a str,
    region: &'a str,
    product_name: &'a str,
    quantity: i64,
    term: &'a str,
    scope: &'a str,
    start_date: &'a str,
    end_date: &'a str,
}

fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parses the timestamp formats seen in cloud exports into RFC 3339 UTC.
pub(crate) fn normalize_timestamp(text: &str) -> Result<String> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%m/%d/%Y %H:%M:%S").map(|dt| dt.and_utc()))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%m/%d/%Y")
                .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        })
        .map_err(|_| Error::config_invalid(format!("\"{text}\" is not a recognised timestamp")))?;
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn upstream_timestamp(text: &str) -> String {
    normalize_timestamp(text).unwrap_or_else(|_| text.to_string())
}

fn parse_gcp(json: &str) -> Result<(Vec<serde_json::Value>, Vec<GcpRecord>)> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| Error::config_invalid(format!("gcp_cuds_json is not a JSON array: {e}")))?;
    let records = raw
        .iter()
        .map(|value| {
            let cud: GcpCud = serde_json::from_value(value.clone())
                .map_err(|e| Error::config_invalid(format!("invalid commitment in gcp_cuds_json: {e}")))?;
            let amount = |kind: &str| {
                cud.resources
                    .iter()
                    .filter(|resource| resource.resource_type == kind)
                    .map(|resource| resource.amount)
                    .sum::<i64>()
            };
            Ok(GcpRecord {
                cpu: amount("VCPU"),
                memory_mb: amount("MEMORY"),
                start_timestamp: normalize_timestamp(&cud.start_timestamp)?,
                end_timestamp: normalize_timestamp(&cud.end_timestamp)?,
                name: cud.name,
                region: cud.region,
                plan: cud.plan,
                cud_type: cud.cud_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((raw, records))
}

/// Parses an Azure reservations CSV export.
pub(crate) fn parse_azure_csv(text: &str) -> Result<Vec<AzureRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    reader
        .deserialize::<AzureReservationRow>()
        .map(|row| {
            let row = row.map_err(|e| Error::config_invalid(format!("invalid reservations CSV: {e}")))?;
            Ok(AzureRecord {
                start_timestamp: normalize_timestamp(&row.purchase_date)?,
                end_timestamp: normalize_timestamp(&row.expiry_date)?,
                reservation_id: row.reservation_id,
                name: row.name,
                region: row.region,
                product_name: row.product_name,
                quantity: row.quantity,
                term: row.term,
                scope: row.scope,
            })
        })
        .collect()
}

fn sorted_list<T: Serialize>(records: &[T], key: &str) -> Result<AttributeValue> {
    let mut items = records
        .iter()
        .map(|record| serde_json::to_value(record).map(AttributeValue::from_json))
        .collect::<serde_json::Result<Vec<_>>>()?;
    sort_records_by(&mut items, key);
    Ok(AttributeValue::List(items))
}

fn derive_gcp_cuds(planned: &AttributeTree) -> Result<Option<AttributeValue>> {
    let Some(json) = planned.get_non_empty_str("gcp_cuds_json") else {
        return Ok(None);
    };
    let (_, records) = parse_gcp(json)?;
    sorted_list(&records, "name").map(Some)
}

/// Derives the sorted reservation records from a CSV attribute.
pub(crate) fn derive_azure(planned: &AttributeTree, attribute: &str) -> Result<Option<AttributeValue>> {
    let Some(csv) = planned.get_non_empty_str(attribute) else {
        return Ok(None);
    };
    sorted_list(&parse_azure_csv(csv)?, "reservation_id").map(Some)
}

fn derive_azure_reservations(planned: &AttributeTree) -> Result<Option<AttributeValue>> {
    derive_azure(planned, "azure_reservations_csv")
}

fn gcp_record_schema() -> Schema {
    ["name", "region", "plan", "type", "start_timestamp", "end_timestamp"]
        .into_iter()
        .fold(Schema::v0(), |schema, name| {
            schema.with_attribute(name, Attribute::computed_string())
        })
        .with_attribute("cpu", Attribute::new(AttributeType::Int, Mode::Computed))
        .with_attribute("memory_mb", Attribute::new(AttributeType::Int, Mode::Computed))
}

/// Schema of one derived Azure reservation.
pub(crate) fn azure_record_schema() -> Schema {
    [
        "reservation_id",
        "name",
        "region",
        "product_name",
        "term",
        "scope",
        "start_timestamp",
        "end_timestamp",
    ]
    .into_iter()
    .fold(Schema::v0(), |schema, name| {
        schema.with_attribute(name, Attribute::computed_string())
    })
    .with_attribute("quantity", Attribute::new(AttributeType::Int, Mode::Computed))
}

fn schema() -> Schema {
    Schema::v0()
        .describe("Cloud commitments imported into CAST AI savings")
        .with_attribute(
            "gcp_cuds_json",
            Attribute::optional_string()
                .validate(Validator::Json)
                .describe("Output of `gcloud compute commitments list --format=json`"),
        )
        .with_attribute(
            "azure_reservations_csv",
            Attribute::optional_string().describe("Azure portal reservations export"),
        )
        .with_attribute("organization_id", Attribute::computed_string())
        .with_attribute("gcp_cuds", Attribute::block_list(gcp_record_schema(), Mode::Computed))
        .with_attribute(
            "azure_reservations",
            Attribute::block_list(azure_record_schema(), Mode::Computed),
        )
        .with_id()
}

/// Organization of the API token.
pub(crate) async fn current_organization(api: &ApiClient, ctx: &VerbContext) -> Result<String> {
    let list: OrganizationList = api.get_json(ctx, ORGANIZATIONS_PATH).await?;
    list.organizations
        .into_iter()
        .map(|organization| organization.id)
        .find(|id| !id.is_empty())
        .ok_or_else(|| Error::MissingField {
            endpoint: ORGANIZATIONS_PATH.to_string(),
            field: "organizations[0].id".to_string(),
        })
}

/// Every commitment of the organization.
pub(crate) async fn list_commitments(api: &ApiClient, ctx: &VerbContext) -> Result<Vec<Commitment>> {
    let list: CommitmentList = api.get_json(ctx, COMMITMENTS_PATH).await?;
    Ok(list.commitments)
}

/// Uploads Azure reservations, replacing what was imported before.
pub(crate) async fn import_azure(api: &ApiClient, ctx: &VerbContext, records: &[AzureRecord]) -> Result<()> {
    let body: Vec<AzureImport<'_>> = records
        .iter()
        .map(|record| AzureImport {
            reservation_id: &record.reservation_id,
            name: &record.name,
            region: &record.region,
            product_name: &record.product_name,
            quantity: record.quantity,
            term: &record.term,
            scope: &record.scope,
            start_date: &record.start_timestamp,
            end_date: &record.end_timestamp,
        })
        .collect();
    api.call(
        ctx,
        ApiRequest::post(IMPORT_AZURE_PATH)
            .query("behaviour", "OVERWRITE")
            .json(&body)?,
        Expect::Ok,
    )
    .await?;
    Ok(())
}

async fn import_gcp(api: &ApiClient, ctx: &VerbContext, raw: &[serde_json::Value]) -> Result<()> {
    api.call(
        ctx,
        ApiRequest::post(IMPORT_GCP_PATH)
            .query("behaviour", "OVERWRITE")
            .json(&raw)?,
        Expect::Ok,
    )
    .await?;
    Ok(())
}

impl Commitment {
    pub(crate) fn cloud(&self) -> Option<Cloud> {
        match (&self.gcp_resource_cud_context, &self.azure_reservation_context) {
            (Some(_), _) => Some(Cloud::Gcp),
            (None, Some(_)) => Some(Cloud::Azure),
            (None, None) => None,
        }
    }

    /// Key matching the derived record: CUD name or reservation id.
    pub(crate) fn key(&self) -> &str {
        match &self.azure_reservation_context {
            Some(azure) => &azure.id,
            None => &self.name,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn gcp_record(&self) -> Option<GcpRecord> {
        let gcp = self.gcp_resource_cud_context.as_ref()?;
        Some(GcpRecord {
            name: self.name.clone(),
            region: self.region.clone(),
            plan: gcp.plan.clone(),
            cud_type: gcp.cud_type.clone(),
            start_timestamp: upstream_timestamp(&self.start_date),
            end_timestamp: upstream_timestamp(&self.end_date),
            cpu: gcp.cpu,
            memory_mb: gcp.memory_mb,
        })
    }

    pub(crate) fn azure_record(&self) -> Option<AzureRecord> {
        let azure = self.azure_reservation_context.as_ref()?;
        Some(AzureRecord {
            reservation_id: azure.id.clone(),
            name: self.name.clone(),
            region: self.region.clone(),
            product_name: azure.product_name.clone(),
            quantity: azure.quantity,
            term: azure.term.clone(),
            scope: azure.scope.clone(),
            start_timestamp: upstream_timestamp(&self.start_date),
            end_timestamp: upstream_timestamp(&self.end_date),
        })
    }
}

/// Azure records listed by the API, sorted like derived ones.
pub(crate) fn azure_records_of(commitments: &[Commitment]) -> Result<AttributeValue> {
    let records: Vec<AzureRecord> = commitments.iter().filter_map(Commitment::azure_record).collect();
    sorted_list(&records, "reservation_id")
}

/// Keys of the records persisted under `attribute`.
pub(crate) fn state_keys(state: &AttributeTree, attribute: &str, key: &str) -> BTreeSet<String> {
    state
        .get(attribute)
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|record| record.as_map()?.get(key)?.as_str().map(str::to_string))
        .collect()
}

async fn delete_commitment(api: &ApiClient, ctx: &VerbContext, id: &str) -> Result<()> {
    debug!(commitment = id, "Deleting commitment");
    match api
        .call(
            ctx,
            ApiRequest::delete(format!("{COMMITMENTS_PATH}/{id}")),
            Expect::NoContent,
        )
        .await
    {
        Err(err) if err.is_not_found() => Ok(()),
        other => other.map(|_| ()),
    }
}

/// Deletes the listed commitments whose keys are in `keys`, concurrently.
pub(crate) async fn delete_matching(
    api: &ApiClient,
    ctx: &VerbContext,
    cloud: Cloud,
    keys: &BTreeSet<String>,
) -> Result<()> {
    let commitments = list_commitments(api, ctx).await?;
    try_join_all(
        commitments
            .iter()
            .filter(|commitment| commitment.cloud() == Some(cloud) && keys.contains(commitment.key()))
            .map(|commitment| delete_commitment(api, ctx, commitment.id())),
    )
    .await?;
    Ok(())
}

struct Commitments;

impl Commitments {
    async fn upload(&self, api: &ApiClient, ctx: &VerbContext, planned: &AttributeTree) -> Result<()> {
        if let Some(json) = planned.get_non_empty_str("gcp_cuds_json") {
            let (raw, _) = parse_gcp(json)?;
            return import_gcp(api, ctx, &raw).await;
        }
        if let Some(csv) = planned.get_non_empty_str("azure_reservations_csv") {
            return import_azure(api, ctx, &parse_azure_csv(csv)?).await;
        }
        Err(Error::config_invalid(
            "one of gcp_cuds_json or azure_reservations_csv must be specified",
        ))
    }
}

#[async_trait]
impl ResourceHandler for Commitments {
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
        let commitments = list_commitments(api, ctx).await?;
        let tracked = match (
            state.get_non_empty_str("gcp_cuds_json"),
            state.get_non_empty_str("azure_reservations_csv"),
        ) {
            (Some(_), _) => Some(Cloud::Gcp),
            (None, Some(_)) => Some(Cloud::Azure),
            (None, None) => None,
        };
        let present = commitments
            .iter()
            .any(|commitment| tracked.is_none_or(|cloud| commitment.cloud() == Some(cloud)));
        if !present {
            return Err(Error::not_found(COMMITMENTS_PATH));
        }

        let gcp: Vec<GcpRecord> = commitments.iter().filter_map(Commitment::gcp_record).collect();
        state.set("gcp_cuds", sorted_list(&gcp, "name")?);
        state.set("azure_reservations", azure_records_of(&commitments)?);
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
        if state.get_non_empty_str("azure_reservations_csv").is_some() {
            let keys = state_keys(state, "azure_reservations", "reservation_id");
            return delete_matching(api, ctx, Cloud::Azure, &keys).await;
        }
        let keys = state_keys(state, "gcp_cuds", "name");
        delete_matching(api, ctx, Cloud::Gcp, &keys).await
    }
}

/// Definition of `castai_commitments`.
#[must_use]
pub fn definition() -> ResourceDefinition {
    ResourceDefinition::builder(TYPE_NAME, Commitments)
        .schema(schema())
        .identity(IdentityStrategy::ServerUuid)
        .conflicts(ConflictStrategy::Surface)
        .policy(Policy::ConflictsWith {
            first: "gcp_cuds_json",
            second: "azure_reservations_csv",
        })
        .policy(Policy::AtLeastOneOf(&["gcp_cuds_json", "azure_reservations_csv"]))
        .policy(Policy::Derive {
            target: "gcp_cuds",
            compute: derive_gcp_cuds,
        })
        .policy(Policy::Derive {
            target: "azure_reservations",
            compute: derive_azure_reservations,
        })
        .build()
}
