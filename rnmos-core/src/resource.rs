//! The resource envelope
//!
//! The registry treats every registered thing — node, device, source, flow,
//! sender, receiver, plus its own subscription records — as an opaque JSON
//! payload wrapped in a small typed envelope: id, type, the API version it
//! was registered at, creation/update stamps and a health value.
//!
//! Payload validation against the IS-04 schemas happens elsewhere; the
//! envelope only cares about the fields that drive registry behavior: `id`,
//! `version`, and the parent reference (`node_id`, `device_id`, `source_id`
//! depending on type).

use crate::tai::{Health, Tai, HEALTH_FOREVER};
use crate::version::ApiVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kinds of resource the registry tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Node,
    Device,
    Source,
    Flow,
    Sender,
    Receiver,
    Subscription,
    Grain,
}

impl ResourceType {
    /// The URL path segment for this type, e.g. `nodes`
    pub fn path_segment(self) -> &'static str {
        match self {
            ResourceType::Node => "nodes",
            ResourceType::Device => "devices",
            ResourceType::Source => "sources",
            ResourceType::Flow => "flows",
            ResourceType::Sender => "senders",
            ResourceType::Receiver => "receivers",
            ResourceType::Subscription => "subscriptions",
            ResourceType::Grain => "grains",
        }
    }

    /// Parse a plural URL path segment, e.g. `nodes`
    pub fn from_path_segment(s: &str) -> Option<Self> {
        match s {
            "nodes" => Some(ResourceType::Node),
            "devices" => Some(ResourceType::Device),
            "sources" => Some(ResourceType::Source),
            "flows" => Some(ResourceType::Flow),
            "senders" => Some(ResourceType::Sender),
            "receivers" => Some(ResourceType::Receiver),
            "subscriptions" => Some(ResourceType::Subscription),
            _ => None,
        }
    }

    /// The payload field naming this type's parent, if it has one
    ///
    /// The parent relationship drives referential integrity checks, health
    /// cascades and cascade deletion: device → node, source/sender/receiver
    /// → device, flow → source.
    pub fn parent_field(self) -> Option<(&'static str, ResourceType)> {
        match self {
            ResourceType::Node => None,
            ResourceType::Device => Some(("node_id", ResourceType::Node)),
            ResourceType::Source => Some(("device_id", ResourceType::Device)),
            ResourceType::Flow => Some(("source_id", ResourceType::Source)),
            ResourceType::Sender => Some(("device_id", ResourceType::Device)),
            ResourceType::Receiver => Some(("device_id", ResourceType::Device)),
            ResourceType::Subscription => None,
            ResourceType::Grain => None,
        }
    }

    /// The six registrable IS-04 types, in tree order
    pub fn registrable() -> [ResourceType; 6] {
        [
            ResourceType::Node,
            ResourceType::Device,
            ResourceType::Source,
            ResourceType::Flow,
            ResourceType::Sender,
            ResourceType::Receiver,
        ]
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Node => "node",
            ResourceType::Device => "device",
            ResourceType::Source => "source",
            ResourceType::Flow => "flow",
            ResourceType::Sender => "sender",
            ResourceType::Receiver => "receiver",
            ResourceType::Subscription => "subscription",
            ResourceType::Grain => "grain",
        };
        f.write_str(s)
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ResourceType::Node),
            "device" => Ok(ResourceType::Device),
            "source" => Ok(ResourceType::Source),
            "flow" => Ok(ResourceType::Flow),
            "sender" => Ok(ResourceType::Sender),
            "receiver" => Ok(ResourceType::Receiver),
            "subscription" => Ok(ResourceType::Subscription),
            "grain" => Ok(ResourceType::Grain),
            _ => Err(format!("unknown resource type: {}", s)),
        }
    }
}

/// A versioned resource: opaque payload plus registry envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Immutable resource id (a UUID string, equal to `data.id`)
    pub id: String,
    /// The resource kind
    #[serde(rename = "type")]
    pub type_: ResourceType,
    /// The API version the resource was registered at
    pub api_version: ApiVersion,
    /// The JSON payload as registered
    pub data: Value,
    /// When the resource was first inserted
    pub created: Tai,
    /// Last mutation stamp; strictly increasing across the whole store
    pub updated: Tai,
    /// TAI seconds of the last heartbeat
    pub health: Health,
}

impl Resource {
    /// Wrap a payload in a new envelope
    ///
    /// `created`/`updated` are assigned by the store on insertion; the
    /// placeholder stamps here are overwritten before the resource becomes
    /// visible. Subscriptions and the registry's self resources never
    /// expire, so their health starts at [`HEALTH_FOREVER`].
    pub fn new(type_: ResourceType, api_version: ApiVersion, data: Value) -> Self {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let health = match type_ {
            ResourceType::Subscription | ResourceType::Grain => HEALTH_FOREVER,
            _ => crate::tai::health_now(),
        };
        Self {
            id,
            type_,
            api_version,
            data,
            created: Tai::default(),
            updated: Tai::default(),
            health,
        }
    }

    /// The id and type of this resource's parent, if its payload names one
    pub fn super_resource(&self) -> Option<(String, ResourceType)> {
        super_resource(self.type_, &self.data)
    }

    /// Whether this resource never expires
    pub fn is_permanent(&self) -> bool {
        self.health == HEALTH_FOREVER
    }
}

/// Extract the parent reference from a payload
pub fn super_resource(type_: ResourceType, data: &Value) -> Option<(String, ResourceType)> {
    let (field, parent_type) = type_.parent_field()?;
    let id = data.get(field)?.as_str()?;
    Some((id.to_string(), parent_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::V1_2;
    use serde_json::json;

    #[test]
    fn test_path_segment_roundtrip() {
        for t in ResourceType::registrable() {
            assert_eq!(ResourceType::from_path_segment(t.path_segment()), Some(t));
        }
        assert_eq!(ResourceType::from_path_segment("grains"), None);
        assert_eq!(ResourceType::from_path_segment("bogus"), None);
    }

    #[test]
    fn test_type_display_parse() {
        assert_eq!("sender".parse::<ResourceType>().unwrap(), ResourceType::Sender);
        assert_eq!(ResourceType::Flow.to_string(), "flow");
        assert!("widget".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_super_resource() {
        let device = Resource::new(
            ResourceType::Device,
            V1_2,
            json!({"id": "d1", "version": "0:0", "node_id": "n1"}),
        );
        assert_eq!(
            device.super_resource(),
            Some(("n1".to_string(), ResourceType::Node))
        );

        let node = Resource::new(ResourceType::Node, V1_2, json!({"id": "n1", "version": "0:0"}));
        assert_eq!(node.super_resource(), None);
    }

    #[test]
    fn test_envelope_id_from_payload() {
        let r = Resource::new(ResourceType::Node, V1_2, json!({"id": "n1", "version": "0:0"}));
        assert_eq!(r.id, "n1");
    }

    #[test]
    fn test_subscription_never_expires() {
        let s = Resource::new(ResourceType::Subscription, V1_2, json!({"id": "s1"}));
        assert!(s.is_permanent());
    }
}
