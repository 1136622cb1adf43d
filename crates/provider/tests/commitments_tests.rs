//! Commitment import tests against a mocked savings API

// Integration tests can use unwrap/expect for cleaner assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use castai_engine::{DiagnosticSeverity, Dispatcher, DynamicValue, Reply, Request, Response};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AZURE_CSV: &str = "\
Name,Reservation Id,Expiry date,Purchase date,Term,Scope,Product name,Region,Quantity
vm-b,res-2,01/15/2027,01/15/2024,P3Y,Shared,Standard_E4s_v5,northeurope,2
vm-a,res-1,2026-01-15,2023-01-15,P3Y,Shared,Standard_D2s_v3,westeurope,4
";

fn value(json: Value) -> DynamicValue {
    DynamicValue {
        json: Some(json),
        msgpack: None,
    }
}

async fn configured(server: &MockServer) -> Dispatcher {
    let dispatcher = Dispatcher::new(castai_provider::registry());
    let reply = dispatcher
        .dispatch(Request::ConfigureProvider {
            config: value(json!({"api_url": server.uri(), "api_token": "test-token"})),
        })
        .await;
    assert!(!reply.has_errors(), "{reply:?}");
    dispatcher
}

async fn plan(dispatcher: &Dispatcher, type_name: &str, proposed: Value) -> (Value, Reply) {
    let reply = dispatcher
        .dispatch(Request::PlanResourceChange {
            type_name: type_name.to_string(),
            prior_state: DynamicValue::null(),
            proposed_new_state: value(proposed),
            prior_tainted: false,
        })
        .await;
    assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
    let planned = match reply.result.clone().expect("a result") {
        Response::Planned { planned_state, .. } => planned_state.json.expect("a planned state"),
        other => panic!("unexpected response {other:?}"),
    };
    (planned, reply)
}

async fn apply(dispatcher: &Dispatcher, type_name: &str, prior: Value, planned: Value) -> Value {
    let reply = dispatcher
        .dispatch(Request::ApplyResourceChange {
            type_name: type_name.to_string(),
            prior_state: value(prior),
            planned_state: value(planned),
        })
        .await;
    assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
    match reply.result.expect("a result") {
        Response::Applied { new_state } => new_state.json.unwrap_or(Value::Null),
        other => panic!("unexpected response {other:?}"),
    }
}

async fn mount_organization(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/organizations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"organizations": [{"id": "org-1"}]})),
        )
        .mount(server)
        .await;
}

fn azure_commitments() -> Value {
    json!({"commitments": [
        {
            "id": "c-2",
            "name": "vm-b",
            "region": "northeurope",
            "startDate": "2024-01-15T00:00:00Z",
            "endDate": "2027-01-15T00:00:00Z",
            "azureReservationContext": {
                "id": "res-2",
                "productName": "Standard_E4s_v5",
                "quantity": "2",
                "term": "P3Y",
                "scope": "Shared"
            }
        },
        {
            "id": "c-1",
            "name": "vm-a",
            "region": "westeurope",
            "startDate": "2023-01-15T00:00:00Z",
            "endDate": "2026-01-15T00:00:00Z",
            "azureReservationContext": {
                "id": "res-1",
                "productName": "Standard_D2s_v3",
                "quantity": 4,
                "term": "P3Y",
                "scope": "Shared"
            }
        }
    ]})
}

#[tokio::test]
async fn test_azure_csv_import_round_trips() {
    let server = MockServer::start().await;
    mount_organization(&server).await;
    Mock::given(method("POST"))
        .and(path("/savings/v1beta/commitments:importAzure"))
        .and(query_param("behaviour", "OVERWRITE"))
        .and(body_json(json!([
            {
                "reservationId": "res-2",
                "name": "vm-b",
                "region": "northeurope",
                "productName": "Standard_E4s_v5",
                "quantity": 2,
                "term": "P3Y",
                "scope": "Shared",
                "startDate": "2024-01-15T00:00:00Z",
                "endDate": "2027-01-15T00:00:00Z"
            },
            {
                "reservationId": "res-1",
                "name": "vm-a",
                "region": "westeurope",
                "productName": "Standard_D2s_v3",
                "quantity": 4,
                "term": "P3Y",
                "scope": "Shared",
                "startDate": "2023-01-15T00:00:00Z",
                "endDate": "2026-01-15T00:00:00Z"
            }
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/savings/v1beta/commitments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(azure_commitments()))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let (planned, _) = plan(
        &dispatcher,
        "castai_commitments",
        json!({"azure_reservations_csv": AZURE_CSV}),
    )
    .await;
    let state = apply(&dispatcher, "castai_commitments", Value::Null, planned.clone()).await;

    assert_eq!(state["id"], "org-1");
    assert_eq!(state["organization_id"], "org-1");
    assert_eq!(state["azure_reservations"], planned["azure_reservations"]);
    assert_eq!(state["azure_reservations"][0]["reservation_id"], "res-1");
    assert_eq!(state["azure_reservations"][1]["quantity"], 2);
}

#[tokio::test]
async fn test_gcp_json_is_uploaded_verbatim() {
    let cuds = json!([{
        "name": "cud-east",
        "region": "https://www.googleapis.com/compute/v1/projects/p/regions/us-east1",
        "plan": "TWELVE_MONTH",
        "type": "GENERAL_PURPOSE_E2",
        "startTimestamp": "2024-03-01T00:00:00.000-08:00",
        "endTimestamp": "2025-03-01T00:00:00.000-08:00",
        "status": "ACTIVE",
        "resources": [
            {"type": "VCPU", "amount": "10"},
            {"type": "MEMORY", "amount": "40960"}
        ]
    }]);

    let server = MockServer::start().await;
    mount_organization(&server).await;
    Mock::given(method("POST"))
        .and(path("/savings/v1beta/commitments:importGCP"))
        .and(query_param("behaviour", "OVERWRITE"))
        .and(body_json(cuds.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/savings/v1beta/commitments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"commitments": [{
            "id": "c-9",
            "name": "cud-east",
            "region": "https://www.googleapis.com/compute/v1/projects/p/regions/us-east1",
            "startDate": "2024-03-01T08:00:00Z",
            "endDate": "2025-03-01T08:00:00Z",
            "gcpResourceCudContext": {
                "cpu": "10",
                "memoryMb": "40960",
                "plan": "TWELVE_MONTH",
                "type": "GENERAL_PURPOSE_E2"
            }
        }]})))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let (planned, _) = plan(
        &dispatcher,
        "castai_commitments",
        json!({"gcp_cuds_json": cuds.to_string()}),
    )
    .await;
    let state = apply(&dispatcher, "castai_commitments", Value::Null, planned.clone()).await;

    assert_eq!(state["gcp_cuds"], planned["gcp_cuds"]);
    assert_eq!(state["gcp_cuds"][0]["cpu"], 10);
    assert_eq!(state["gcp_cuds"][0]["memory_mb"], 40960);
    assert_eq!(state["gcp_cuds"][0]["start_timestamp"], "2024-03-01T08:00:00Z");
}

#[tokio::test]
async fn test_destroy_removes_only_tracked_commitments() {
    let server = MockServer::start().await;
    let mut listed = azure_commitments();
    listed["commitments"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": "c-7", "name": "cud-west", "gcpResourceCudContext": {"cpu": 4}}));
    Mock::given(method("GET"))
        .and(path("/savings/v1beta/commitments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listed))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/savings/v1beta/commitments/c-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/savings/v1beta/commitments/c-2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/savings/v1beta/commitments/c-7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({
        "id": "org-1",
        "organization_id": "org-1",
        "azure_reservations_csv": AZURE_CSV,
        "azure_reservations": [
            {"reservation_id": "res-1"},
            {"reservation_id": "res-2"}
        ]
    });
    let state = apply(&dispatcher, "castai_commitments", prior, Value::Null).await;

    assert_eq!(state, Value::Null);
}

#[tokio::test]
async fn test_reservations_plan_warns_about_deprecation() {
    let dispatcher = Dispatcher::new(castai_provider::registry());
    let (planned, reply) = plan(
        &dispatcher,
        "castai_reservations",
        json!({"reservations_csv": AZURE_CSV}),
    )
    .await;

    let warning = reply
        .diagnostics
        .iter()
        .find(|d| d.severity == DiagnosticSeverity::Warning)
        .expect("deprecation warning");
    assert!(warning.summary.contains("castai_commitments"));
    assert_eq!(planned["reservations"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_reservations_import_via_organization() {
    let server = MockServer::start().await;
    mount_organization(&server).await;
    Mock::given(method("POST"))
        .and(path("/savings/v1beta/commitments:importAzure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/savings/v1beta/commitments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(azure_commitments()))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let (planned, _) = plan(
        &dispatcher,
        "castai_reservations",
        json!({"reservations_csv": AZURE_CSV}),
    )
    .await;
    let state = apply(&dispatcher, "castai_reservations", Value::Null, planned.clone()).await;

    assert_eq!(state["id"], "org-1");
    assert_eq!(state["reservations"], planned["reservations"]);
}
