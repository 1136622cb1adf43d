//! End-to-end reconciliation tests
//!
//! Every test drives the dispatcher the way the host does, against a mocked
//! CAST AI API, and checks both the returned state and the exact calls made.

// Integration tests can use unwrap/expect for cleaner assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use castai_engine::{Dispatcher, DynamicValue, Reply, Request, Response};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GROUP: &str = "castai_organization_group";
const RULE: &str = "castai_runtime_security_rule";
const TEMPLATE: &str = "castai_node_template";
const CACHE_CONFIGURATION: &str = "castai_cache_configuration";
const CACHE_RULE: &str = "castai_cache_rule";

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

fn new_state(reply: Reply) -> Value {
    assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
    match reply.result.expect("a result") {
        Response::Applied { new_state } | Response::Read { new_state } => {
            new_state.json.unwrap_or(Value::Null)
        }
        other => panic!("unexpected response {other:?}"),
    }
}

async fn plan(dispatcher: &Dispatcher, type_name: &str, prior: Value, proposed: Value) -> Value {
    let reply = dispatcher
        .dispatch(Request::PlanResourceChange {
            type_name: type_name.to_string(),
            prior_state: value(prior),
            proposed_new_state: value(proposed),
            prior_tainted: false,
        })
        .await;
    assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
    match reply.result.expect("a result") {
        Response::Planned { planned_state, .. } => planned_state.json.expect("a planned state"),
        other => panic!("unexpected response {other:?}"),
    }
}

async fn apply(dispatcher: &Dispatcher, type_name: &str, prior: Value, planned: Value) -> Reply {
    dispatcher
        .dispatch(Request::ApplyResourceChange {
            type_name: type_name.to_string(),
            prior_state: value(prior),
            planned_state: value(planned),
        })
        .await
}

async fn read(dispatcher: &Dispatcher, type_name: &str, current: Value) -> Reply {
    dispatcher
        .dispatch(Request::ReadResource {
            type_name: type_name.to_string(),
            current_state: value(current),
        })
        .await
}

async fn import(dispatcher: &Dispatcher, type_name: &str, handle: &str) -> Value {
    let reply = dispatcher
        .dispatch(Request::ImportResourceState {
            type_name: type_name.to_string(),
            id: handle.to_string(),
        })
        .await;
    assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
    match reply.result.expect("a result") {
        Response::Imported { mut imported_resources } => {
            assert_eq!(imported_resources.len(), 1);
            imported_resources.remove(0).state.json.expect("an imported state")
        }
        other => panic!("unexpected response {other:?}"),
    }
}

fn group_body(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "organizationId": "org-1",
        "createTime": "2024-05-01T10:00:00Z",
        "members": []
    })
}

fn rule_body(id: &str, built_in: bool) -> Value {
    json!({
        "id": id,
        "name": "detect-shell",
        "category": "execution",
        "severity": "SEVERITY_HIGH",
        "ruleText": "event.type == 'exec'",
        "ruleEngineType": "RULE_ENGINE_TYPE_CEL",
        "enabled": true,
        "isBuiltIn": built_in,
        "usedCustomLists": []
    })
}

fn templates(names: &[&str]) -> Value {
    let items: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({"template": {
                "name": name,
                "isDefault": *name == "default-by-castai",
                "isEnabled": true,
                "shouldTaint": true
            }})
        })
        .collect();
    json!({"items": items})
}

#[tokio::test]
async fn test_cache_configuration_adopts_listed_object() {
    let server = MockServer::start().await;
    let list = "/v1/dbo/cache-groups/cache-group-123/cache-configurations";
    let object = "/v1/dbo/cache-groups/cache-group-123/cache-configurations/existing-456";

    Mock::given(method("GET"))
        .and(path(list))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "existing-456", "databaseName": "test-db", "mode": "DontCache"}],
            "nextCursor": ""
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(list))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(object))
        .and(body_partial_json(json!({"id": "existing-456", "databaseName": "test-db", "mode": "Auto"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(object))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "existing-456",
            "databaseName": "test-db",
            "mode": "Auto"
        })))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(
        &dispatcher,
        CACHE_CONFIGURATION,
        Value::Null,
        json!({"cache_group_id": "cache-group-123", "database_name": "test-db", "mode": "Auto"}),
    )
    .await;
    let state = new_state(apply(&dispatcher, CACHE_CONFIGURATION, Value::Null, planned).await);

    assert_eq!(state["id"], "existing-456");
    assert_eq!(state["cache_group_id"], "cache-group-123");
    assert_eq!(state["mode"], "Auto");
}

#[tokio::test]
async fn test_cache_configuration_import_by_name_or_uuid() {
    let server = MockServer::start().await;
    let id = "5f1c2d3e-4a5b-4c6d-8e7f-9a0b1c2d3e4f";
    Mock::given(method("GET"))
        .and(path("/v1/dbo/cache-groups/cache-group-123/cache-configurations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": id, "databaseName": "test-db", "mode": "Manual", "manualTtl": 300}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/dbo/cache-groups/cache-group-123/cache-configurations/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "databaseName": "test-db",
            "mode": "Manual",
            "manualTtl": 300
        })))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let by_name = import(&dispatcher, CACHE_CONFIGURATION, "cache-group-123/test-db").await;
    let by_uuid = import(&dispatcher, CACHE_CONFIGURATION, &format!("cache-group-123/{id}")).await;

    assert_eq!(by_name, by_uuid);
    assert_eq!(by_name["id"], id);
    assert_eq!(by_name["cache_group_id"], "cache-group-123");
    assert_eq!(by_name["manual_ttl"], 300);
}

#[tokio::test]
async fn test_read_of_deleted_rule_drops_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/security/runtime/rules/rule-123"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "rule not found"})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let reply = read(&dispatcher, RULE, json!({"id": "rule-123", "name": "detect-shell"})).await;

    assert!(reply.diagnostics.is_empty());
    assert_eq!(new_state(reply), Value::Null);
}

#[tokio::test]
async fn test_destroying_built_in_rule_disables_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/security/runtime/rules:toggle"))
        .and(body_json(json!({"enabled": false, "ids": ["uuid-456"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/security/runtime/rules:delete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({
        "id": "uuid-456",
        "name": "detect-shell",
        "category": "execution",
        "severity": "SEVERITY_HIGH",
        "rule_text": "event.type == 'exec'",
        "enabled": true,
        "is_built_in": true
    });
    let reply = apply(&dispatcher, RULE, prior, Value::Null).await;

    assert_eq!(new_state(reply), Value::Null);
}

#[tokio::test]
async fn test_destroying_custom_rule_deletes_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/security/runtime/rules/uuid-321"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_body("uuid-321", false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/security/runtime/rules:delete"))
        .and(body_json(json!({"ids": ["uuid-321"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({"id": "uuid-321", "name": "detect-shell", "is_built_in": false});
    let reply = apply(&dispatcher, RULE, prior, Value::Null).await;

    assert_eq!(new_state(reply), Value::Null);
}

#[tokio::test]
async fn test_created_rule_is_found_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/security/runtime/rules"))
        .and(body_partial_json(json!({"name": "detect-shell", "ruleText": "event.type == 'exec'"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/security/runtime/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [rule_body("uuid-999", false)],
            "nextCursor": ""
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/security/runtime/rules/uuid-999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_body("uuid-999", false)))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(
        &dispatcher,
        RULE,
        Value::Null,
        json!({
            "name": "detect-shell",
            "category": "execution",
            "severity": "SEVERITY_HIGH",
            "rule_text": "event.type == 'exec'\n\n"
        }),
    )
    .await;
    let state = new_state(apply(&dispatcher, RULE, Value::Null, planned).await);

    assert_eq!(state["id"], "uuid-999");
    assert_eq!(state["rule_text"], "event.type == 'exec'");
    assert_eq!(state["is_built_in"], false);
}

#[tokio::test]
async fn test_trailing_whitespace_in_rule_text_is_not_a_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/security/runtime/rules/uuid-456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_body("uuid-456", false)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let mut state = new_state(read(&dispatcher, RULE, json!({"id": "uuid-456", "name": "detect-shell"})).await);
    assert_eq!(state["rule_text"], "event.type == 'exec'");

    for _ in 0..3 {
        let mut proposed = state.clone();
        proposed["rule_text"] = json!("event.type == 'exec'  \n");
        let planned = plan(&dispatcher, RULE, state.clone(), proposed).await;
        assert_eq!(planned, state);

        let applied = new_state(apply(&dispatcher, RULE, state.clone(), planned).await);
        assert_eq!(applied, state);
        state = new_state(read(&dispatcher, RULE, applied).await);
    }
}

#[tokio::test]
async fn test_group_import_walks_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/groups"))
        .and(query_param("page.cursor", "cursor-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [group_body("uuid-789", "engineering-team")],
            "nextCursor": ""
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [group_body("uuid-111", "finance")],
            "nextCursor": "cursor-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(group_body("uuid-789", "engineering-team")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let state = import(&dispatcher, GROUP, "engineering-team").await;

    assert_eq!(state["id"], "uuid-789");
    assert_eq!(state["name"], "engineering-team");
    assert_eq!(state["organization_id"], "org-1");
}

#[tokio::test]
async fn test_group_import_by_uuid_reads_directly() {
    let server = MockServer::start().await;
    let id = "0b0f3c1e-5a7d-4f7e-9d59-2f8c6c1b2a10";
    Mock::given(method("GET"))
        .and(path(format!("/v1/groups/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(group_body(id, "platform")))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let state = import(&dispatcher, GROUP, id).await;

    assert_eq!(state["id"], id);
    assert_eq!(state["name"], "platform");
}

#[tokio::test]
async fn test_cache_rule_conflict_rejected_without_network() {
    let dispatcher = Dispatcher::new(castai_provider::registry());
    let reply = dispatcher
        .dispatch(Request::PlanResourceChange {
            type_name: CACHE_RULE.to_string(),
            prior_state: DynamicValue::null(),
            proposed_new_state: value(json!({
                "cache_group_id": "group-1",
                "cache_configuration_id": "config-1",
                "table": "orders",
                "template_hash": "a1b2c3",
                "ttl_seconds": 60
            })),
            prior_tainted: false,
        })
        .await;

    assert!(reply.result.is_none());
    let diagnostic = reply
        .diagnostics
        .iter()
        .find(|d| d.summary.contains("only one of table or template_hash can be specified"))
        .expect("conflict diagnostic");
    assert!(diagnostic.is_error());
    assert_eq!(diagnostic.attribute_path.as_deref(), Some("template_hash"));
}

#[tokio::test]
async fn test_node_template_import_with_cluster_parent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kubernetes/clusters/cluster-abc/node-templates"))
        .and(query_param("includeDefault", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(templates(&["default-by-castai", "some-template-name"])),
        )
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let state = import(&dispatcher, TEMPLATE, "cluster-abc/some-template-name").await;

    assert_eq!(state["id"], "some-template-name");
    assert_eq!(state["cluster_id"], "cluster-abc");
    assert_eq!(state["name"], "some-template-name");
    assert_eq!(state["is_default"], false);
}

#[tokio::test]
async fn test_node_template_import_of_unknown_name_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kubernetes/clusters/cluster-abc/node-templates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(templates(&["default-by-castai"])))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let reply = dispatcher
        .dispatch(Request::ImportResourceState {
            type_name: TEMPLATE.to_string(),
            id: "cluster-abc/missing".to_string(),
        })
        .await;

    assert!(reply.has_errors());
    assert!(reply.diagnostics[0].summary.contains("cluster-abc/missing"));
}

#[tokio::test]
async fn test_default_template_create_retries_until_visible() {
    let server = MockServer::start().await;
    let object = "/v1/kubernetes/clusters/cluster-abc/node-templates/default-by-castai";
    Mock::given(method("PUT"))
        .and(path(object))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not ready"})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(object))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/kubernetes/clusters/cluster-abc/node-templates"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kubernetes/clusters/cluster-abc/node-templates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(templates(&["default-by-castai"])))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(
        &dispatcher,
        TEMPLATE,
        Value::Null,
        json!({"cluster_id": "cluster-abc", "name": "default-by-castai"}),
    )
    .await;
    let state = new_state(apply(&dispatcher, TEMPLATE, Value::Null, planned).await);

    assert_eq!(state["id"], "default-by-castai");
    assert_eq!(state["is_default"], true);
}

#[tokio::test]
async fn test_default_template_delete_is_local() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({"id": "default-by-castai", "cluster_id": "cluster-abc", "name": "default-by-castai"});
    let reply = apply(&dispatcher, TEMPLATE, prior, Value::Null).await;

    assert_eq!(new_state(reply), Value::Null);
}

#[tokio::test]
async fn test_group_create_then_read_is_stable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/groups"))
        .and(body_partial_json(json!({"name": "platform"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "uuid-789"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(group_body("uuid-789", "platform")))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(&dispatcher, GROUP, Value::Null, json!({"name": "platform"})).await;
    let created = new_state(apply(&dispatcher, GROUP, Value::Null, planned).await);
    assert_eq!(created["id"], "uuid-789");
    assert_eq!(created["members"], Value::Null);

    let refreshed = new_state(read(&dispatcher, GROUP, created.clone()).await);
    assert_eq!(refreshed, created);
}

fn without_nulls(state: Value) -> Value {
    match state {
        Value::Object(fields) => fields.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        other => other,
    }
}

#[tokio::test]
async fn test_group_import_matches_created_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "uuid-789"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [group_body("uuid-789", "platform")],
            "nextCursor": ""
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(group_body("uuid-789", "platform")))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(&dispatcher, GROUP, Value::Null, json!({"name": "platform"})).await;
    let created = new_state(apply(&dispatcher, GROUP, Value::Null, planned).await);
    let imported = import(&dispatcher, GROUP, "platform").await;

    assert_eq!(without_nulls(imported), without_nulls(created));
}

#[tokio::test]
async fn test_group_id_is_stable_across_reads_and_updates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(group_body("uuid-789", "platform")))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "uuid-other"})))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let mut state = json!({"id": "uuid-789", "name": "platform"});
    for description in ["first", "second"] {
        state = new_state(read(&dispatcher, GROUP, state).await);
        assert_eq!(state["id"], "uuid-789");

        let mut proposed = state.clone();
        proposed["description"] = json!(description);
        let planned = plan(&dispatcher, GROUP, state.clone(), proposed).await;
        state = new_state(apply(&dispatcher, GROUP, state, planned).await);
        assert_eq!(state["id"], "uuid-789");
        assert_eq!(state["description"], description);
    }
    let state = new_state(read(&dispatcher, GROUP, state).await);
    assert_eq!(state["id"], "uuid-789");
}

#[tokio::test]
async fn test_group_conflict_adopts_existing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "group already exists"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [group_body("uuid-789", "platform")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/groups/uuid-789"))
        .and(body_partial_json(json!({"name": "platform", "description": "Platform team"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "uuid-789",
            "name": "platform",
            "description": "Platform team",
            "members": []
        })))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(
        &dispatcher,
        GROUP,
        Value::Null,
        json!({"name": "platform", "description": "Platform team"}),
    )
    .await;
    let state = new_state(apply(&dispatcher, GROUP, Value::Null, planned).await);

    assert_eq!(state["id"], "uuid-789");
    assert_eq!(state["description"], "Platform team");
}

#[tokio::test]
async fn test_unchanged_update_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({"id": "uuid-789", "name": "platform", "organization_id": "org-1"});
    let planned = plan(&dispatcher, GROUP, prior.clone(), json!({"name": "platform"})).await;
    let state = new_state(apply(&dispatcher, GROUP, prior, planned).await);

    assert_eq!(state["id"], "uuid-789");
    assert_eq!(state["organization_id"], "org-1");
}

#[tokio::test]
async fn test_delete_of_absent_group_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/groups/uuid-gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "group not found"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/groups/uuid-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let prior = json!({"id": "uuid-gone", "name": "platform"});
    let reply = apply(&dispatcher, GROUP, prior, Value::Null).await;

    assert_eq!(new_state(reply), Value::Null);
}

#[tokio::test]
async fn test_server_error_keeps_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/groups"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "database unavailable"})))
        .mount(&server)
        .await;

    let dispatcher = configured(&server).await;
    let planned = plan(&dispatcher, GROUP, Value::Null, json!({"name": "platform"})).await;
    let reply = apply(&dispatcher, GROUP, Value::Null, planned).await;

    assert!(reply.result.is_none());
    let diagnostic = &reply.diagnostics[0];
    assert!(diagnostic.is_error());
    assert!(diagnostic.detail.contains("POST /v1/groups"), "{}", diagnostic.detail);
    assert!(diagnostic.detail.contains("database unavailable"), "{}", diagnostic.detail);
}

#[tokio::test]
async fn test_apply_before_configure_fails() {
    let dispatcher = Dispatcher::new(castai_provider::registry());
    let reply = apply(&dispatcher, GROUP, Value::Null, json!({"name": "platform"})).await;

    assert!(reply.has_errors());
}

#[tokio::test]
async fn test_configure_reads_token_from_env() {
    let server = MockServer::start().await;
    let uri = server.uri();
    temp_env::async_with_vars(
        [
            ("CASTAI_API_TOKEN", Some("env-token")),
            ("CASTAI_API_URL", Some(uri.as_str())),
        ],
        async {
            let dispatcher = Dispatcher::new(castai_provider::registry());
            let reply = dispatcher
                .dispatch(Request::ConfigureProvider {
                    config: value(json!({})),
                })
                .await;
            assert!(!reply.has_errors(), "{:?}", reply.diagnostics);
        },
    )
    .await;
}

#[tokio::test]
async fn test_configure_without_token_fails() {
    temp_env::async_with_vars([("CASTAI_API_TOKEN", None::<&str>)], async {
        let dispatcher = Dispatcher::new(castai_provider::registry());
        let reply = dispatcher
            .dispatch(Request::ConfigureProvider {
                config: value(json!({"api_url": "https://api.cast.ai"})),
            })
            .await;
        assert!(reply.has_errors());
    })
    .await;
}
