//! The Node API
//!
//! The registry's read-only view of itself as an NMOS node: `/self` and the
//! subresources that hang off it. See NodeAPI.raml in the IS-04 suite.

use crate::api_utils::{
    add_api_finally_handler, parse_is04_version, patterns, set_reply, set_status_reply,
    versions_reply,
};
use crate::downgrade::{downgrade, is_permitted_downgrade};
use crate::model::RegistryModel;
use crate::router::{from_fn, ApiRouter, Method, StatusCode};
use crate::store::Resources;
use rnmos_core::{ApiError, Resource, ResourceType, IS04_VERSIONS};
use serde_json::{json, Value};
use std::sync::Arc;

/// Build the Node API router (navigation + versioned mount)
pub fn make_node_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["x-nmos/"]));
            Ok((res, true))
        })
    }));

    api.support("/x-nmos/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["node/"]));
            Ok((res, true))
        })
    }));

    api.support(
        "/x-nmos/node/?",
        Method::GET,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_reply(&mut res, StatusCode::OK, versions_reply(&IS04_VERSIONS));
                Ok((res, true))
            })
        }),
    );

    api.mount_all(
        &format!("/x-nmos/node/{}", patterns::VERSION),
        Arc::new(make_unmounted_node_api(model)),
    );

    add_api_finally_handler(&mut api);
    api
}

/// Whether a resource belongs to the given node's tree
fn belongs_to_node(resources: &Resources, node_id: &str, resource: &Resource) -> bool {
    let mut current = resource;
    loop {
        if current.type_ == ResourceType::Node {
            return current.id == node_id;
        }
        match current
            .super_resource()
            .and_then(|(parent_id, _)| resources.find(&parent_id))
        {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

fn make_unmounted_node_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(
                &mut res,
                StatusCode::OK,
                json!(["self/", "devices/", "sources/", "flows/", "senders/", "receivers/"]),
            );
            Ok((res, true))
        })
    }));

    // GET /self: the registry's own node
    let self_model = model.clone();
    api.support("/self/?", Method::GET, from_fn(move |_req, mut res, _path, params| {
        let model = self_model.clone();
        Box::pin(async move {
            let version = parse_is04_version(&params)?;
            let locked = model.model.lock().await;
            let self_id = locked.self_node_id.clone();
            match locked.resources.find(&self_id) {
                Some(node) if is_permitted_downgrade(node, version) => {
                    tracing::debug!(id = %node.id, "Returning self resource");
                    set_reply(&mut res, StatusCode::OK, downgrade(node, version));
                }
                _ => {
                    tracing::error!("Self resource not found");
                    set_status_reply(&mut res, StatusCode::NOT_FOUND);
                }
            }
            Ok((res, true))
        })
    }));

    // GET /receivers/{id}/target: IS-04 target pairing is not implemented
    let target_model = model.clone();
    api.support(
        &format!("/receivers/{}/target/?", patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = target_model.clone();
            Box::pin(async move {
                let version = parse_is04_version(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                let self_id = locked.self_node_id.clone();
                match locked.resources.find(id) {
                    Some(r)
                        if r.type_ == ResourceType::Receiver
                            && is_permitted_downgrade(r, version)
                            && belongs_to_node(&locked.resources, &self_id, r) =>
                    {
                        set_status_reply(&mut res, StatusCode::NOT_IMPLEMENTED);
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // GET /{subresourceType}: everything of that type under this node
    let list_model = model.clone();
    api.support(
        &format!("/{}/?", patterns::SUBRESOURCE_TYPE),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = list_model.clone();
            Box::pin(async move {
                let version = parse_is04_version(&params)?;
                let type_ = subresource_type_param(&params)?;
                let locked = model.model.lock().await;
                let self_id = locked.self_node_id.clone();
                let body: Vec<Value> = locked
                    .resources
                    .iterate_by_type(type_)
                    .filter(|r| {
                        is_permitted_downgrade(r, version)
                            && belongs_to_node(&locked.resources, &self_id, r)
                    })
                    .map(|r| downgrade(r, version))
                    .collect();
                tracing::debug!(type_ = %type_, count = body.len(), "Returning node subresources");
                set_reply(&mut res, StatusCode::OK, Value::Array(body));
                Ok((res, true))
            })
        }),
    );

    // GET /{subresourceType}/{resourceId}
    let single_model = model;
    api.support(
        &format!("/{}/{}/?", patterns::SUBRESOURCE_TYPE, patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = single_model.clone();
            Box::pin(async move {
                let version = parse_is04_version(&params)?;
                let type_ = subresource_type_param(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                let self_id = locked.self_node_id.clone();
                match locked.resources.find(id) {
                    Some(r)
                        if r.type_ == type_
                            && is_permitted_downgrade(r, version)
                            && belongs_to_node(&locked.resources, &self_id, r) =>
                    {
                        set_reply(&mut res, StatusCode::OK, downgrade(r, version));
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    api
}

fn subresource_type_param(
    params: &crate::router::RouteParams,
) -> rnmos_core::Result<ResourceType> {
    params
        .get("resourceType")
        .and_then(|s| ResourceType::from_path_segment(s))
        .ok_or(ApiError::NotFound)
}
