//! The registry's own resources
//!
//! At startup the registry describes itself as an NMOS node: a node, a
//! device, one sender and one receiver, derived from the host settings.
//! These are served by the Node and Connection APIs and inserted into the
//! registry store so they show up in query results like any registered
//! resource. They never expire.

use rnmos_core::{make_id, Resource, ResourceType, Settings, HEALTH_FOREVER, V1_2};
use serde_json::json;

/// Build the self node, device, sender and receiver
///
/// The node comes first; callers record its id as the Node API's subject.
pub fn make_server_resources(settings: &Settings) -> Vec<Resource> {
    let node_id = make_id();
    let device_id = make_id();
    let sender_id = make_id();
    let receiver_id = make_id();

    let host = &settings.host_address;
    let label = &settings.host_name;

    let node = json!({
        "id": node_id,
        "version": "0:0",
        "label": label,
        "description": label,
        "tags": {},
        "href": format!("http://{}:{}/", host, settings.node_port),
        "hostname": settings.host_name,
        "caps": {},
        "services": [],
        "api": {
            "versions": ["v1.0", "v1.1", "v1.2"],
            "endpoints": [{"host": host, "port": settings.node_port, "protocol": "http"}],
        },
        "clocks": [],
        "interfaces": [],
    });

    let device = json!({
        "id": device_id,
        "version": "0:0",
        "label": label,
        "description": label,
        "tags": {},
        "type": "urn:x-nmos:device:generic",
        "node_id": node_id,
        "senders": [sender_id],
        "receivers": [receiver_id],
        "controls": [],
    });

    let sender = json!({
        "id": sender_id,
        "version": "0:0",
        "label": label,
        "description": label,
        "tags": {},
        "device_id": device_id,
        "flow_id": null,
        "transport": "urn:x-nmos:transport:rtp",
        "manifest_href": format!(
            "http://{}:{}/x-nmos/connection/v1.0/single/senders/{}/transportfile/",
            host, settings.connection_port, sender_id
        ),
        "interface_bindings": [],
        "caps": {},
        "subscription": {"receiver_id": null, "active": false},
    });

    let receiver = json!({
        "id": receiver_id,
        "version": "0:0",
        "label": label,
        "description": label,
        "tags": {},
        "device_id": device_id,
        "format": "urn:x-nmos:format:data",
        "transport": "urn:x-nmos:transport:rtp",
        "caps": {},
        "interface_bindings": [],
        "subscription": {"sender_id": null, "active": false},
    });

    [
        (ResourceType::Node, node),
        (ResourceType::Device, device),
        (ResourceType::Sender, sender),
        (ResourceType::Receiver, receiver),
    ]
    .into_iter()
    .map(|(type_, data)| {
        let mut resource = Resource::new(type_, V1_2, data);
        resource.health = HEALTH_FOREVER;
        resource
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Resources;

    #[test]
    fn test_self_resources_form_a_tree() {
        let resources = make_server_resources(&Settings::default());
        assert_eq!(resources.len(), 4);
        assert_eq!(resources[0].type_, ResourceType::Node);

        // insert in order with strict parent checking
        let mut store = Resources::new();
        for resource in resources {
            store.insert(resource, false).unwrap();
        }
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_self_resources_never_expire() {
        for resource in make_server_resources(&Settings::default()) {
            assert!(resource.is_permanent());
        }
    }
}
