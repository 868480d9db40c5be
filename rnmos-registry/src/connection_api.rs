//! The Connection API (IS-05)
//!
//! Connection setup between senders and receivers. This registry implements
//! the `single` immediate-activation path: a PATCH to `/staged` with
//! `activation.mode == "activate_immediate"` flips `subscription.active`
//! and the paired id under the store lock, producing a modification event
//! for query subscribers. Staged/active/constraints views and bulk
//! operations answer 501; the transport file is a minimal SDP document.

use crate::api_utils::{
    add_api_finally_handler, parse_is05_version, patterns, set_content_reply, set_reply,
    set_status_reply, versions_reply,
};
use crate::events::ResourceEvent;
use crate::model::RegistryModel;
use crate::router::{from_fn, ApiRouter, Method, StatusCode};
use rnmos_core::{ApiError, ResourceType, IS05_VERSIONS};
use serde_json::{json, Value};
use std::sync::Arc;

const ACTIVATE_IMMEDIATE: &str = "activate_immediate";
const SDP_TRANSPORT_FILE: &str = "v=0\r\no=- 37 42 IN IP4 127.0.0.1 \r\ns= \r\nt=0 0\r\n";

/// Build the Connection API router (navigation + versioned mount)
pub fn make_connection_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["x-nmos/"]));
            Ok((res, true))
        })
    }));

    api.support("/x-nmos/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["connection/"]));
            Ok((res, true))
        })
    }));

    api.support(
        "/x-nmos/connection/?",
        Method::GET,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_reply(&mut res, StatusCode::OK, versions_reply(&IS05_VERSIONS));
                Ok((res, true))
            })
        }),
    );

    api.mount_all(
        &format!("/x-nmos/connection/{}", patterns::VERSION),
        Arc::new(make_unmounted_connection_api(model)),
    );

    add_api_finally_handler(&mut api);
    api
}

fn make_unmounted_connection_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["bulk/", "single/"]));
            Ok((res, true))
        })
    }));

    api.support("/bulk/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["senders/", "receivers/"]));
            Ok((res, true))
        })
    }));

    api.support(
        &format!("/bulk/{}/?", patterns::CONNECTOR_TYPE),
        Method::GET,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_status_reply(&mut res, StatusCode::METHOD_NOT_ALLOWED);
                Ok((res, true))
            })
        }),
    );

    api.support(
        &format!("/bulk/{}/?", patterns::CONNECTOR_TYPE),
        Method::POST,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_status_reply(&mut res, StatusCode::NOT_IMPLEMENTED);
                Ok((res, true))
            })
        }),
    );

    api.support("/single/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["senders/", "receivers/"]));
            Ok((res, true))
        })
    }));

    // GET /single/{connectorType}: the connectable ids
    let list_model = model.clone();
    api.support(
        &format!("/single/{}/?", patterns::CONNECTOR_TYPE),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = list_model.clone();
            Box::pin(async move {
                parse_is05_version(&params)?;
                let type_ = connector_type_param(&params)?;
                let locked = model.model.lock().await;
                let body: Vec<Value> = locked
                    .resources
                    .iterate_by_type(type_)
                    .map(|r| Value::String(format!("{}/", r.id)))
                    .collect();
                tracing::debug!(type_ = %type_, count = body.len(), "Returning connectors");
                set_reply(&mut res, StatusCode::OK, Value::Array(body));
                Ok((res, true))
            })
        }),
    );

    // GET /single/{connectorType}/{resourceId}: per-connector navigation
    let nav_model = model.clone();
    api.support(
        &format!("/single/{}/{}/?", patterns::CONNECTOR_TYPE, patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = nav_model.clone();
            Box::pin(async move {
                parse_is05_version(&params)?;
                let type_ = connector_type_param(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(r) if r.type_ == type_ => {
                        let body = if type_ == ResourceType::Sender {
                            json!(["constraints/", "staged/", "active/", "transportfile/"])
                        } else {
                            json!(["constraints/", "staged/", "active/"])
                        };
                        set_reply(&mut res, StatusCode::OK, body);
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // staged/active/constraints views are not modeled in this registry
    for endpoint in ["constraints", "staged", "active"] {
        api.support(
            &format!(
                "/single/{}/{}/{}/?",
                patterns::CONNECTOR_TYPE,
                patterns::RESOURCE_ID,
                endpoint
            ),
            Method::GET,
            from_fn(|_req, mut res, _path, _params| {
                Box::pin(async move {
                    set_status_reply(&mut res, StatusCode::NOT_IMPLEMENTED);
                    Ok((res, true))
                })
            }),
        );
    }

    // PATCH /single/{connectorType}/{resourceId}/staged
    let patch_model = model.clone();
    api.support(
        &format!(
            "/single/{}/{}/staged/?",
            patterns::CONNECTOR_TYPE,
            patterns::RESOURCE_ID
        ),
        Method::PATCH,
        from_fn(move |req, mut res, _path, params| {
            let model = patch_model.clone();
            Box::pin(async move {
                parse_is05_version(&params)?;
                let type_ = connector_type_param(&params)?;
                let id = params["resourceId"].clone();

                let body = req.json()?;
                let master_enable = body
                    .get("master_enable")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| {
                        ApiError::MalformedRequest("staged PATCH has no master_enable".to_string())
                    })?;
                let mode = body
                    .get("activation")
                    .and_then(|a| a.get("mode"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ApiError::MalformedRequest("staged PATCH has no activation.mode".to_string())
                    })?
                    .to_string();

                enum Outcome {
                    Activated,
                    OtherMode,
                    Missing,
                }
                let outcome = {
                    let mut locked = model.model.lock().await;
                    match locked.resources.find(&id) {
                        Some(r) if r.type_ == type_ => {
                            if mode != ACTIVATE_IMMEDIATE {
                                Outcome::OtherMode
                            } else {
                                let pre = r.data.clone();
                                let peer_field = if type_ == ResourceType::Sender {
                                    "receiver_id"
                                } else {
                                    "sender_id"
                                };
                                let peer = if master_enable {
                                    body.get(peer_field).cloned().unwrap_or(Value::Null)
                                } else {
                                    Value::Null
                                };
                                locked.resources.modify(&id, |r| {
                                    if !r
                                        .data
                                        .get("subscription")
                                        .map(Value::is_object)
                                        .unwrap_or(false)
                                    {
                                        r.data["subscription"] = json!({});
                                    }
                                    r.data["subscription"]["active"] = json!(master_enable);
                                    r.data["subscription"][peer_field] = peer.clone();
                                });
                                if let Some(r) = locked.resources.find(&id) {
                                    let (post, updated) = (r.data.clone(), r.updated);
                                    locked.push_events([ResourceEvent::modified(
                                        type_, &id, pre, post, updated,
                                    )]);
                                }
                                Outcome::Activated
                            }
                        }
                        _ => Outcome::Missing,
                    }
                };

                match outcome {
                    Outcome::Activated => {
                        model.events.notify_one();
                        tracing::info!(id = %id, enabled = master_enable, "Activated connection");
                        set_reply(&mut res, StatusCode::OK, json!({}));
                    }
                    Outcome::OtherMode => set_status_reply(&mut res, StatusCode::NOT_IMPLEMENTED),
                    Outcome::Missing => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // GET /single/senders/{resourceId}/transportfile: a minimal SDP document
    let sdp_model = model;
    api.support(
        &format!("/single/senders/{}/transportfile/?", patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = sdp_model.clone();
            Box::pin(async move {
                parse_is05_version(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(r) if r.type_ == ResourceType::Sender => {
                        set_content_reply(
                            &mut res,
                            StatusCode::OK,
                            "application/sdp",
                            SDP_TRANSPORT_FILE.to_string(),
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

fn connector_type_param(
    params: &crate::router::RouteParams,
) -> rnmos_core::Result<ResourceType> {
    params
        .get("resourceType")
        .and_then(|s| ResourceType::from_path_segment(s))
        .filter(|t| matches!(t, ResourceType::Sender | ResourceType::Receiver))
        .ok_or(ApiError::NotFound)
}
