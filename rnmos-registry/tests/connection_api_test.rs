//! End-to-end Connection API tests

mod common;

use common::start_registry;
use serde_json::{json, Value};

/// The registry's own sender id, via the Connection API listing
async fn self_sender_id(registry: &common::TestRegistry) -> String {
    let senders: Vec<Value> = reqwest::Client::new()
        .get(registry.connection_url("/single/senders"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    senders[0]
        .as_str()
        .unwrap()
        .trim_end_matches('/')
        .to_string()
}

#[tokio::test]
async fn test_navigation_and_listing() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let root: Value = client
        .get(format!("http://{}/x-nmos/connection/", registry.connection))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root, json!(["v1.0/"]));

    let single: Value = client
        .get(registry.connection_url("/single"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(single, json!(["senders/", "receivers/"]));

    let sender_id = self_sender_id(&registry).await;
    let endpoints: Value = client
        .get(registry.connection_url(&format!("/single/senders/{}", sender_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        endpoints,
        json!(["constraints/", "staged/", "active/", "transportfile/"])
    );

    registry.handle.abort();
}

#[tokio::test]
async fn test_patch_staged_activate_immediate() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let sender_id = self_sender_id(&registry).await;
    let receiver_id = "ffff1111-0000-4000-8000-000000000001";

    let response = client
        .patch(registry.connection_url(&format!("/single/senders/{}/staged", sender_id)))
        .json(&json!({
            "master_enable": true,
            "activation": {"mode": "activate_immediate"},
            "receiver_id": receiver_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // the mutation is visible through the Query API
    let sender: Value = client
        .get(registry.query_url(&format!("/senders/{}", sender_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sender["subscription"]["active"], true);
    assert_eq!(sender["subscription"]["receiver_id"], receiver_id);

    // disabling clears the paired id
    let response = client
        .patch(registry.connection_url(&format!("/single/senders/{}/staged", sender_id)))
        .json(&json!({
            "master_enable": false,
            "activation": {"mode": "activate_immediate"},
            "receiver_id": receiver_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let sender: Value = client
        .get(registry.query_url(&format!("/senders/{}", sender_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sender["subscription"]["active"], false);
    assert_eq!(sender["subscription"]["receiver_id"], Value::Null);

    registry.handle.abort();
}

#[tokio::test]
async fn test_patch_other_modes_not_implemented() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let sender_id = self_sender_id(&registry).await;

    let response = client
        .patch(registry.connection_url(&format!("/single/senders/{}/staged", sender_id)))
        .json(&json!({
            "master_enable": true,
            "activation": {"mode": "activate_scheduled_absolute", "requested_time": "0:0"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 501);

    registry.handle.abort();
}

#[tokio::test]
async fn test_patch_malformed_400() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let sender_id = self_sender_id(&registry).await;

    let response = client
        .patch(registry.connection_url(&format!("/single/senders/{}/staged", sender_id)))
        .json(&json!({"activation": {"mode": "activate_immediate"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    registry.handle.abort();
}

#[tokio::test]
async fn test_views_not_implemented() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let sender_id = self_sender_id(&registry).await;

    for endpoint in ["constraints", "staged", "active"] {
        let response = client
            .get(registry.connection_url(&format!("/single/senders/{}/{}", sender_id, endpoint)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 501, "GET {} should be 501", endpoint);
    }

    registry.handle.abort();
}

#[tokio::test]
async fn test_transportfile_is_sdp() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let sender_id = self_sender_id(&registry).await;

    let response = client
        .get(registry.connection_url(&format!("/single/senders/{}/transportfile", sender_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/sdp"
    );
    let body = response.text().await.unwrap();
    assert!(body.starts_with("v=0"));

    registry.handle.abort();
}

#[tokio::test]
async fn test_bulk_stubs() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let get = client
        .get(registry.connection_url("/bulk/senders"))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), 405);

    let post = client
        .post(registry.connection_url("/bulk/senders"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 501);

    registry.handle.abort();
}

#[tokio::test]
async fn test_unknown_connector_404() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let response = client
        .get(registry.connection_url("/single/senders/not-a-sender"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    registry.handle.abort();
}
