//! Shared harness for registry integration tests
//!
//! Starts a full registry on ephemeral ports and exposes the bound
//! addresses plus URL helpers for each API.
#![allow(dead_code)]

use rnmos_core::Settings;
use rnmos_registry::{Api, CloseHandle, RegistryServer};
use serde_json::{json, Value};
use std::net::SocketAddr;

pub struct TestRegistry {
    pub registration: SocketAddr,
    pub query: SocketAddr,
    pub query_ws: SocketAddr,
    pub node: SocketAddr,
    pub connection: SocketAddr,
    pub settings: SocketAddr,
    pub logging: SocketAddr,
    pub close: CloseHandle,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestRegistry {
    pub fn registration_url(&self, path: &str) -> String {
        format!("http://{}/x-nmos/registration/v1.2{}", self.registration, path)
    }

    pub fn query_url(&self, path: &str) -> String {
        self.query_url_at("v1.2", path)
    }

    pub fn query_url_at(&self, version: &str, path: &str) -> String {
        format!("http://{}/x-nmos/query/{}{}", self.query, version, path)
    }

    pub fn node_url(&self, path: &str) -> String {
        format!("http://{}/x-nmos/node/v1.2{}", self.node, path)
    }

    pub fn connection_url(&self, path: &str) -> String {
        format!("http://{}/x-nmos/connection/v1.0{}", self.connection, path)
    }

    pub fn settings_url(&self) -> String {
        format!("http://{}/settings/all", self.settings)
    }

    pub fn logging_url(&self, path: &str) -> String {
        format!("http://{}/log{}", self.logging, path)
    }
}

pub async fn start_registry(expiry_secs: u64) -> TestRegistry {
    let settings = Settings {
        host_name: "registry".to_string(),
        registration_expiry_interval: expiry_secs,
        query_port: 0,
        query_ws_port: 0,
        registration_port: 0,
        node_port: 0,
        connection_port: 0,
        settings_port: 0,
        logging_port: 0,
        ..Settings::default()
    };
    let server = RegistryServer::builder()
        .settings(settings)
        .build()
        .await
        .expect("registry should bind ephemeral ports");

    let registry = TestRegistry {
        registration: server.local_addr(Api::Registration),
        query: server.local_addr(Api::Query),
        query_ws: server.local_addr(Api::QueryWs),
        node: server.local_addr(Api::Node),
        connection: server.local_addr(Api::Connection),
        settings: server.local_addr(Api::Settings),
        logging: server.local_addr(Api::Logging),
        close: server.close_handle(),
        handle: tokio::spawn(async move {
            let _ = server.run().await;
        }),
    };
    // let the listeners start accepting
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    registry
}

/// A registration body for a node
pub fn node_body(id: &str, label: &str) -> Value {
    json!({
        "type": "node",
        "data": {
            "id": id,
            "version": "0:0",
            "label": label,
            "href": "http://localhost/",
            "hostname": label,
            "caps": {},
            "services": [],
        }
    })
}

/// A registration body for a device under a node
pub fn device_body(id: &str, node_id: &str, label: &str) -> Value {
    json!({
        "type": "device",
        "data": {
            "id": id,
            "version": "0:0",
            "label": label,
            "type": "urn:x-nmos:device:generic",
            "node_id": node_id,
            "senders": [],
            "receivers": [],
        }
    })
}

/// A registration body for a source under a device
pub fn source_body(id: &str, device_id: &str, label: &str) -> Value {
    json!({
        "type": "source",
        "data": {
            "id": id,
            "version": "0:0",
            "label": label,
            "description": label,
            "format": "urn:x-nmos:format:video",
            "caps": {},
            "tags": {},
            "device_id": device_id,
            "parents": [],
        }
    })
}

/// A registration body for a sender under a device
pub fn sender_body(id: &str, device_id: &str, label: &str) -> Value {
    json!({
        "type": "sender",
        "data": {
            "id": id,
            "version": "0:0",
            "label": label,
            "description": label,
            "flow_id": null,
            "transport": "urn:x-nmos:transport:rtp",
            "device_id": device_id,
            "manifest_href": "http://localhost/sdp",
            "subscription": {"receiver_id": null, "active": false},
        }
    })
}
