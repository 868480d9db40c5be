//! The Registration API
//!
//! Registrants POST resources and heartbeat them here. See
//! <https://github.com/AMWA-TV/nmos-discovery-registration> (RegistrationAPI.raml).
//!
//! - `POST /resource` `{type, data}` — create (201 + Location) or update
//!   (200); parent presence is enforced unless `allow_invalid_resources`
//! - `POST /health/nodes/{id}` — refresh the node and all descendants
//! - `DELETE /resource/{type}/{id}` — cascade delete
//!
//! Every mutation queues events for subscribers and signals the two
//! condition variables before replying.

use crate::api_utils::{
    add_api_finally_handler, parse_is04_version, patterns, set_reply, set_status_reply,
    versions_reply,
};
use crate::events::{removal_events, ResourceEvent};
use crate::model::RegistryModel;
use crate::router::{from_fn, ApiRouter, HeaderValue, Method, StatusCode};
use rnmos_core::{health_now, ApiError, Resource, ResourceType, Tai, IS04_VERSIONS};
use serde_json::{json, Value};
use std::sync::Arc;

/// Build the Registration API router (navigation + versioned mount)
pub fn make_registration_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["x-nmos/"]));
            Ok((res, true))
        })
    }));

    api.support("/x-nmos/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["registration/"]));
            Ok((res, true))
        })
    }));

    api.support(
        "/x-nmos/registration/?",
        Method::GET,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_reply(&mut res, StatusCode::OK, versions_reply(&IS04_VERSIONS));
                Ok((res, true))
            })
        }),
    );

    api.mount_all(
        &format!("/x-nmos/registration/{}", patterns::VERSION),
        Arc::new(make_unmounted_registration_api(model)),
    );

    add_api_finally_handler(&mut api);
    api
}

fn make_unmounted_registration_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["resource/", "health/"]));
            Ok((res, true))
        })
    }));

    // POST /resource: create if absent, update if present
    let registration_model = model.clone();
    api.support("/resource/?", Method::POST, from_fn(move |req, mut res, _path, params| {
        let model = registration_model.clone();
        Box::pin(async move {
            let version = parse_is04_version(&params)?;
            let body = req.json()?;
            let type_: ResourceType = body
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::MalformedRequest("registration has no type".to_string()))?
                .parse()
                .map_err(ApiError::MalformedRequest)?;
            if !ResourceType::registrable().contains(&type_) {
                return Err(ApiError::MalformedRequest(format!(
                    "{} is not a registrable type",
                    type_
                )));
            }
            let data = body
                .get("data")
                .cloned()
                .ok_or_else(|| ApiError::MalformedRequest("registration has no data".to_string()))?;
            let id = data
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::MalformedRequest("resource data has no id".to_string()))?
                .to_string();

            let (created, registered) = {
                let mut locked = model.model.lock().await;
                let allow_invalid = locked.settings.allow_invalid_resources;
                let created = match locked.resources.find(&id) {
                    Some(existing) => {
                        if existing.type_ != type_ {
                            return Err(ApiError::MalformedRequest(format!(
                                "id {} is already registered as a {}",
                                id, existing.type_
                            )));
                        }
                        let pre = existing.data.clone();
                        locked.resources.modify(&id, |r| {
                            r.data = data.clone();
                            r.api_version = version;
                        });
                        let (post, updated) = registered_state(&locked, &id)?;
                        locked.push_events([ResourceEvent::modified(
                            type_, &id, pre, post, updated,
                        )]);
                        false
                    }
                    None => {
                        locked
                            .resources
                            .insert(Resource::new(type_, version, data.clone()), allow_invalid)?;
                        let (post, updated) = registered_state(&locked, &id)?;
                        locked.push_events([ResourceEvent::added(type_, &id, post, updated)]);
                        true
                    }
                };
                locked.resources.set_health(&id, health_now());
                let (registered, _) = registered_state(&locked, &id)?;
                (created, registered)
            };

            model.expiration.notify_one();
            model.events.notify_one();

            if created {
                tracing::info!(id = %id, type_ = %type_, "Registered resource");
                let location = format!(
                    "/x-nmos/registration/{}/resource/{}/{}",
                    version,
                    type_.path_segment(),
                    id
                );
                if let Ok(value) = HeaderValue::from_str(&location) {
                    res.headers.insert(axum::http::header::LOCATION, value);
                }
                set_reply(&mut res, StatusCode::CREATED, registered);
            } else {
                tracing::info!(id = %id, type_ = %type_, "Updated resource registration");
                set_reply(&mut res, StatusCode::OK, registered);
            }
            Ok((res, true))
        })
    }));

    // GET /resource/{type}/{id}: the resource as registered
    let get_model = model.clone();
    api.support(
        &format!("/resource/{}/{}/?", patterns::RESOURCE_TYPE, patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = get_model.clone();
            Box::pin(async move {
                let type_ = resource_type_param(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(resource) if resource.type_ == type_ => {
                        set_reply(&mut res, StatusCode::OK, resource.data.clone());
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // DELETE /resource/{type}/{id}: cascade delete
    let delete_model = model.clone();
    api.support(
        &format!("/resource/{}/{}/?", patterns::RESOURCE_TYPE, patterns::RESOURCE_ID),
        Method::DELETE,
        from_fn(move |_req, mut res, _path, params| {
            let model = delete_model.clone();
            Box::pin(async move {
                let type_ = resource_type_param(&params)?;
                let id = params["resourceId"].clone();
                let deleted = {
                    let mut locked = model.model.lock().await;
                    match locked.resources.find(&id) {
                        Some(resource) if resource.type_ == type_ => {
                            let removed = locked.resources.erase(&id);
                            tracing::info!(id = %id, count = removed.len(), "Deleted resource");
                            let base = locked.resources.strictly_increasing_update();
                            let events = removal_events(&removed, base);
                            locked.push_events(events);
                            true
                        }
                        _ => false,
                    }
                };
                if deleted {
                    model.events.notify_one();
                    set_status_reply(&mut res, StatusCode::NO_CONTENT);
                } else {
                    set_status_reply(&mut res, StatusCode::NOT_FOUND);
                }
                Ok((res, true))
            })
        }),
    );

    // POST /health/nodes/{id}: heartbeat the node and its descendants
    let health_model = model.clone();
    api.support(
        &format!("/health/nodes/{}/?", patterns::RESOURCE_ID),
        Method::POST,
        from_fn(move |_req, mut res, _path, params| {
            let model = health_model.clone();
            Box::pin(async move {
                let id = params["resourceId"].clone();
                let refreshed = {
                    let mut locked = model.model.lock().await;
                    match locked.resources.find(&id) {
                        Some(resource) if resource.type_ == ResourceType::Node => {
                            let health = health_now();
                            locked.resources.set_health(&id, health);
                            Some(health)
                        }
                        _ => None,
                    }
                };
                match refreshed {
                    Some(health) => {
                        model.expiration.notify_one();
                        set_reply(&mut res, StatusCode::OK, json!({"health": health.to_string()}));
                    }
                    None => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // GET /health/nodes/{id}: the node's current health
    let health_get_model = model;
    api.support(
        &format!("/health/nodes/{}/?", patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = health_get_model.clone();
            Box::pin(async move {
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(resource) if resource.type_ == ResourceType::Node => {
                        set_reply(
                            &mut res,
                            StatusCode::OK,
                            json!({"health": resource.health.to_string()}),
                        );
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    api
}

fn resource_type_param(
    params: &crate::router::RouteParams,
) -> rnmos_core::Result<ResourceType> {
    params
        .get("resourceType")
        .and_then(|s| ResourceType::from_path_segment(s))
        .ok_or(ApiError::NotFound)
}

fn registered_state(
    locked: &crate::model::Model,
    id: &str,
) -> rnmos_core::Result<(Value, Tai)> {
    locked
        .resources
        .find(id)
        .map(|r| (r.data.clone(), r.updated))
        .ok_or_else(|| ApiError::Internal(format!("resource {} vanished during registration", id)))
}
