//! End-to-end query subscription (WebSocket) tests

mod common;

use common::{node_body, start_registry, TestRegistry};
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn create_subscription(registry: &TestRegistry, body: Value) -> Value {
    reqwest::Client::new()
        .post(registry.query_url("/subscriptions"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_grain(stream: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a grain")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn changes(grain: &Value) -> &Vec<Value> {
    grain["grain"]["data"].as_array().unwrap()
}

#[tokio::test]
async fn test_sync_grain_on_connect() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();
    let id = "11112222-0000-4000-8000-000000000001";

    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(id, "pre-existing"))
        .send()
        .await
        .unwrap();

    let subscription = create_subscription(
        &registry,
        json!({"resource_path": "/nodes", "params": {}, "persist": false, "max_update_rate_ms": 100}),
    )
    .await;
    let ws_href = subscription["ws_href"].as_str().unwrap();

    let (mut stream, _) = tokio_tungstenite::connect_async(ws_href).await.unwrap();
    let grain = next_grain(&mut stream).await;

    assert_eq!(grain["grain_type"], "event");
    assert_eq!(grain["grain"]["topic"], "/nodes/");
    assert_eq!(grain["flow_id"], subscription["id"]);
    let sync = changes(&grain)
        .iter()
        .find(|c| c["path"] == id)
        .expect("sync grain should describe the pre-existing node");
    assert!(sync.get("pre").is_none());
    assert_eq!(sync["post"]["label"], "pre-existing");

    registry.handle.abort();
}

#[tokio::test]
async fn test_events_stream_after_sync() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let subscription = create_subscription(
        &registry,
        json!({"resource_path": "/nodes", "params": {}, "persist": false, "max_update_rate_ms": 50}),
    )
    .await;
    let (mut stream, _) =
        tokio_tungstenite::connect_async(subscription["ws_href"].as_str().unwrap())
            .await
            .unwrap();

    let id = "11112222-0000-4000-8000-000000000002";
    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(id, "late"))
        .send()
        .await
        .unwrap();

    // skip grains until the addition shows up
    let added = loop {
        let grain = next_grain(&mut stream).await;
        if let Some(change) = changes(&grain).iter().find(|c| c["path"] == id) {
            break change.clone();
        }
    };
    assert!(added.get("pre").is_none());
    assert_eq!(added["post"]["label"], "late");

    // a modification carries both pre and post
    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(id, "renamed"))
        .send()
        .await
        .unwrap();
    let modified = loop {
        let grain = next_grain(&mut stream).await;
        if let Some(change) = changes(&grain).iter().find(|c| c["path"] == id) {
            break change.clone();
        }
    };
    assert_eq!(modified["pre"]["label"], "late");
    assert_eq!(modified["post"]["label"], "renamed");

    // a deletion carries only pre
    client
        .delete(registry.registration_url(&format!("/resource/nodes/{}", id)))
        .send()
        .await
        .unwrap();
    let deleted = loop {
        let grain = next_grain(&mut stream).await;
        if let Some(change) = changes(&grain).iter().find(|c| c["path"] == id) {
            break change.clone();
        }
    };
    assert_eq!(deleted["pre"]["label"], "renamed");
    assert!(deleted.get("post").is_none());

    registry.handle.abort();
}

#[tokio::test]
async fn test_subscription_filter_applies_to_stream() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let subscription = create_subscription(
        &registry,
        json!({
            "resource_path": "/nodes",
            "params": {"label": "wanted"},
            "persist": false,
            "max_update_rate_ms": 50,
        }),
    )
    .await;
    let (mut stream, _) =
        tokio_tungstenite::connect_async(subscription["ws_href"].as_str().unwrap())
            .await
            .unwrap();

    let unwanted = "11112222-0000-4000-8000-000000000003";
    let wanted = "11112222-0000-4000-8000-000000000004";
    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(unwanted, "other"))
        .send()
        .await
        .unwrap();
    client
        .post(registry.registration_url("/resource"))
        .json(&node_body(wanted, "wanted"))
        .send()
        .await
        .unwrap();

    let grain = next_grain(&mut stream).await;
    let paths: Vec<&str> = changes(&grain)
        .iter()
        .filter_map(|c| c["path"].as_str())
        .collect();
    assert!(paths.contains(&wanted));
    assert!(!paths.contains(&unwanted));

    registry.handle.abort();
}

#[tokio::test]
async fn test_nonpersistent_subscription_vanishes_on_close() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let subscription = create_subscription(
        &registry,
        json!({"resource_path": "/nodes", "params": {}, "persist": false, "max_update_rate_ms": 100}),
    )
    .await;
    let id = subscription["id"].as_str().unwrap().to_string();

    let (stream, _) = tokio_tungstenite::connect_async(subscription["ws_href"].as_str().unwrap())
        .await
        .unwrap();
    // still present while a session is attached
    let while_open = client
        .get(registry.query_url(&format!("/subscriptions/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(while_open.status(), 200);

    drop(stream);

    // vanishes once the last session closes
    let mut gone = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let response = client
            .get(registry.query_url(&format!("/subscriptions/{}", id)))
            .send()
            .await
            .unwrap();
        if response.status() == 404 {
            gone = true;
            break;
        }
    }
    assert!(gone, "non-persistent subscription should vanish on last close");

    registry.handle.abort();
}

#[tokio::test]
async fn test_persistent_subscription_survives_close() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let subscription = create_subscription(
        &registry,
        json!({"resource_path": "/nodes", "params": {}, "persist": true, "max_update_rate_ms": 100}),
    )
    .await;
    let id = subscription["id"].as_str().unwrap().to_string();

    let (stream, _) = tokio_tungstenite::connect_async(subscription["ws_href"].as_str().unwrap())
        .await
        .unwrap();
    drop(stream);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let response = client
        .get(registry.query_url(&format!("/subscriptions/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    registry.handle.abort();
}

#[tokio::test]
async fn test_unknown_subscription_is_rejected() {
    let registry = start_registry(12).await;

    let url = format!(
        "ws://{}/x-nmos/query/v1.2/subscriptions/not-a-subscription",
        registry.query_ws
    );
    // the server upgrades then immediately closes without sending a grain
    match tokio_tungstenite::connect_async(&url).await {
        Ok((mut stream, _)) => {
            let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
            match next {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
                other => panic!("expected the connection to close, got {:?}", other),
            }
        }
        Err(_) => {}
    }

    registry.handle.abort();
}

#[tokio::test]
async fn test_grain_rate_limiting() {
    let registry = start_registry(12).await;
    let client = reqwest::Client::new();

    let subscription = create_subscription(
        &registry,
        json!({"resource_path": "/nodes", "params": {}, "persist": false, "max_update_rate_ms": 500}),
    )
    .await;
    let (mut stream, _) =
        tokio_tungstenite::connect_async(subscription["ws_href"].as_str().unwrap())
            .await
            .unwrap();

    // two quick registrations; the first grain to carry either starts the
    // rate window and the second change must wait out the full interval
    for (id, label) in [
        ("11112222-0000-4000-8000-000000000005", "one"),
        ("11112222-0000-4000-8000-000000000006", "two"),
    ] {
        client
            .post(registry.registration_url("/resource"))
            .json(&node_body(id, label))
            .send()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut arrivals = Vec::new();
    let started = tokio::time::Instant::now();
    while arrivals.len() < 2 {
        let grain = next_grain(&mut stream).await;
        if !changes(&grain).is_empty() {
            arrivals.push(started.elapsed());
        }
        if arrivals.len() == 1 && changes(&grain).len() >= 2 {
            // both changes were batched into one grain; nothing to time
            break;
        }
    }
    if arrivals.len() == 2 {
        let gap = arrivals[1] - arrivals[0];
        assert!(
            gap >= Duration::from_millis(400),
            "grains arrived {}ms apart, expected the update rate to hold them",
            gap.as_millis()
        );
    }

    registry.handle.abort();
}
