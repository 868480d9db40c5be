//! End-to-end Query API tests: filters, RQL, paging, downgrade,
//! subscription management

mod common;

use common::{device_body, node_body, source_body, start_registry};
use serde_json::{json, Value};

#[tokio::test]
async fn test_rql_filter_selects_matching_devices() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let node_id = "aaaa1111-0000-4000-8000-000000000001";

    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(node_id, "host"))
        .send()
        .await
        .unwrap();
    for (id, label) in [
        ("aaaa1111-0000-4000-8000-000000000002", "alpha"),
        ("aaaa1111-0000-4000-8000-000000000003", "beta"),
    ] {
        client
            .post(registry.registration_url("/resource"))
            .json(&device_body(id, node_id, label))
            .send()
            .await
            .unwrap();
    }

    let url = format!(
        "{}?query.rql=matches(label,%22al.%2a%22)",
        registry.query_url("/devices")
    );
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let devices: Vec<Value> = response.json().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["label"], "alpha");

    registry.handle.abort();
}

#[tokio::test]
async fn test_basic_and_rql_filters_combine() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let node_id = "bbbb1111-0000-4000-8000-000000000001";
    let device_id = "bbbb1111-0000-4000-8000-000000000002";

    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(node_id, "host"))
        .send()
        .await
        .unwrap();
    client
        .post(registry.registration_url("/resource"))
        .json(&device_body(device_id, node_id, "alpha"))
        .send()
        .await
        .unwrap();

    // basic matches, RQL does not: AND-combination yields nothing
    let url = format!(
        "{}?label=alpha&query.rql=eq(label,%22beta%22)",
        registry.query_url("/devices")
    );
    let devices: Vec<Value> = client.get(url).send().await.unwrap().json().await.unwrap();
    assert!(devices.is_empty());

    registry.handle.abort();
}

#[tokio::test]
async fn test_paging_window_and_total_count() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let node_id = "cccc1111-0000-4000-8000-000000000001";
    let device_id = "cccc1111-0000-4000-8000-000000000002";

    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(node_id, "host"))
        .send()
        .await
        .unwrap();
    client
        .post(registry.registration_url("/resource"))
        .json(&device_body(device_id, node_id, "host"))
        .send()
        .await
        .unwrap();
    for (id, label) in [
        ("cccc1111-0000-4000-8000-000000000003", "cam1"),
        ("cccc1111-0000-4000-8000-000000000004", "cam2"),
        ("cccc1111-0000-4000-8000-000000000005", "cam3"),
    ] {
        client
            .post(registry.registration_url("/resource"))
            .json(&source_body(id, device_id, label))
            .send()
            .await
            .unwrap();
    }

    let url = format!(
        "{}?paging.offset=1&paging.limit=1",
        registry.query_url("/sources")
    );
    let response = client.get(url).send().await.unwrap();
    assert_eq!(
        response.headers().get("x-total-count").unwrap().to_str().unwrap(),
        "3"
    );
    let sources: Vec<Value> = response.json().await.unwrap();
    assert_eq!(sources.len(), 1);
    // registration order is update order
    assert_eq!(sources[0]["label"], "cam2");

    registry.handle.abort();
}

#[tokio::test]
async fn test_downgrade_round_trip() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let id = "dddd1111-0000-4000-8000-000000000001";

    let mut body = node_body(id, "versioned");
    body["data"]["description"] = json!("a v1.1 field");
    body["data"]["api"] = json!({"versions": ["v1.2"]});
    body["data"]["clocks"] = json!([]);
    body["data"]["interfaces"] = json!([]);
    client
        .post(registry.registration_url("/resource"))
        .json(&body)
        .send()
        .await
        .unwrap();

    // at v1.0, the v1.1/v1.2 fields are omitted
    let at_v10: Value = client
        .get(registry.query_url_at("v1.0", &format!("/nodes/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(at_v10["label"], "versioned");
    assert!(at_v10.get("description").is_none());
    assert!(at_v10.get("interfaces").is_none());

    // refetching at v1.2 still has everything
    let at_v12: Value = client
        .get(registry.query_url_at("v1.2", &format!("/nodes/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(at_v12["description"], "a v1.1 field");
    assert!(at_v12.get("interfaces").is_some());

    registry.handle.abort();
}

#[tokio::test]
async fn test_unsupported_version_404() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let response = client
        .get(registry.query_url_at("v9.9", "/nodes"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    registry.handle.abort();
}

#[tokio::test]
async fn test_subscription_create_and_collapse() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let body = json!({
        "max_update_rate_ms": 100,
        "persist": false,
        "secure": false,
        "resource_path": "/senders",
        "params": {"label": "x"},
    });
    let created = client
        .post(registry.query_url("/subscriptions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let first: Value = created.json().await.unwrap();
    let id = first["id"].as_str().unwrap().to_string();
    let ws_href = first["ws_href"].as_str().unwrap();
    assert!(ws_href.contains(&format!("/x-nmos/query/v1.2/subscriptions/{}", id)));

    // an equivalent request collapses to the existing subscription
    let collapsed = client
        .post(registry.query_url("/subscriptions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(collapsed.status(), 200);
    let second: Value = collapsed.json().await.unwrap();
    assert_eq!(second["id"], id.as_str());

    // a different filter is a different subscription
    let different = client
        .post(registry.query_url("/subscriptions"))
        .json(&json!({
            "max_update_rate_ms": 100,
            "persist": false,
            "secure": false,
            "resource_path": "/senders",
            "params": {"label": "y"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(different.status(), 201);

    registry.handle.abort();
}

#[tokio::test]
async fn test_subscription_delete_semantics() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let transient: Value = client
        .post(registry.query_url("/subscriptions"))
        .json(&json!({"resource_path": "/nodes", "persist": false, "params": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let transient_id = transient["id"].as_str().unwrap();

    // clients may not delete non-persistent subscriptions
    let forbidden = client
        .delete(registry.query_url(&format!("/subscriptions/{}", transient_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let persistent: Value = client
        .post(registry.query_url("/subscriptions"))
        .json(&json!({"resource_path": "/nodes", "persist": true, "params": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let persistent_id = persistent["id"].as_str().unwrap();

    let deleted = client
        .delete(registry.query_url(&format!("/subscriptions/{}", persistent_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    let gone = client
        .get(registry.query_url(&format!("/subscriptions/{}", persistent_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    registry.handle.abort();
}

#[tokio::test]
async fn test_bad_subscription_rejected() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let bad_path = client
        .post(registry.query_url("/subscriptions"))
        .json(&json!({"resource_path": "/widgets", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_path.status(), 400);

    let bad_rql = client
        .post(registry.query_url("/subscriptions"))
        .json(&json!({"resource_path": "/nodes", "params": {"query.rql": "eq(label"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_rql.status(), 400);

    registry.handle.abort();
}
