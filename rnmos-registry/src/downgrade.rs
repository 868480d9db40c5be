//! API version downgrade
//!
//! A resource registered at API version X may be served at version Y < X by
//! omitting the fields introduced after Y. Serving at a version newer than
//! the resource's own is never permitted, so a v1.0 node does not appear in
//! v1.2 listings.

use rnmos_core::{ApiVersion, Resource, ResourceType, V1_1, V1_2};
use serde_json::Value;

/// Fields a type gained at a given version
fn fields_added(type_: ResourceType, version: ApiVersion) -> &'static [&'static str] {
    match (type_, version) {
        (ResourceType::Node, V1_1) => &["description", "tags", "api", "clocks"],
        (ResourceType::Node, V1_2) => &["interfaces"],
        (ResourceType::Device, V1_1) => &["description", "tags", "controls"],
        (ResourceType::Source, V1_1) => &["clock_name", "grain_rate"],
        (ResourceType::Flow, V1_1) => &[
            "device_id",
            "grain_rate",
            "media_type",
            "sample_rate",
            "bit_depth",
            "DID_SDID",
            "frame_width",
            "frame_height",
            "colorspace",
            "interlace_mode",
            "transfer_characteristic",
            "components",
        ],
        (ResourceType::Sender, V1_2) => &["caps", "interface_bindings", "subscription"],
        (ResourceType::Receiver, V1_2) => &["interface_bindings"],
        _ => &[],
    }
}

/// Whether a resource may be served at the requested version
pub fn is_permitted_downgrade(resource: &Resource, version: ApiVersion) -> bool {
    resource.api_version.major == version.major && version <= resource.api_version
}

/// The resource payload as seen at the requested version
pub fn downgrade(resource: &Resource, version: ApiVersion) -> Value {
    let mut data = resource.data.clone();
    if let Some(obj) = data.as_object_mut() {
        for introduced in [V1_1, V1_2] {
            if version < introduced && introduced <= resource.api_version {
                for field in fields_added(resource.type_, introduced) {
                    obj.remove(*field);
                }
            }
        }
    }
    data
}
