//! The Query API (REST side)
//!
//! Read-only listings of everything registered, with the basic/RQL filter
//! engine and paging, plus subscription management. The streaming side
//! lives in the WebSocket listener and fanout worker.

use crate::api_utils::{
    add_api_finally_handler, parse_is04_version, patterns, set_reply, set_status_reply,
    versions_reply,
};
use crate::downgrade::{downgrade, is_permitted_downgrade};
use crate::events::{removal_events, ResourceEvent};
use crate::model::RegistryModel;
use crate::query::{filter_paged, MatchFlags, ResourceQuery};
use crate::router::{from_fn, ApiRouter, HeaderValue, Method, StatusCode};
use rnmos_core::{make_id, ApiError, Resource, ResourceType, IS04_VERSIONS};
use serde_json::{json, Value};
use std::sync::Arc;

/// Build the Query API router (navigation + versioned mount)
pub fn make_query_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["x-nmos/"]));
            Ok((res, true))
        })
    }));

    api.support("/x-nmos/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["query/"]));
            Ok((res, true))
        })
    }));

    api.support(
        "/x-nmos/query/?",
        Method::GET,
        from_fn(|_req, mut res, _path, _params| {
            Box::pin(async move {
                set_reply(&mut res, StatusCode::OK, versions_reply(&IS04_VERSIONS));
                Ok((res, true))
            })
        }),
    );

    api.mount_all(
        &format!("/x-nmos/query/{}", patterns::VERSION),
        Arc::new(make_unmounted_query_api(model)),
    );

    add_api_finally_handler(&mut api);
    api
}

fn make_unmounted_query_api(model: Arc<RegistryModel>) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(
                &mut res,
                StatusCode::OK,
                json!([
                    "nodes/", "devices/", "sources/", "flows/", "senders/", "receivers/",
                    "subscriptions/"
                ]),
            );
            Ok((res, true))
        })
    }));

    // POST /subscriptions: create, collapsing equivalent subscriptions
    let create_model = model.clone();
    api.support("/subscriptions/?", Method::POST, from_fn(move |req, mut res, _path, params| {
        let model = create_model.clone();
        Box::pin(async move {
            let version = parse_is04_version(&params)?;
            let body = req.json()?;
            let request = SubscriptionRequest::from_body(&body)?;

            let (status, data) = {
                let mut locked = model.model.lock().await;
                let existing = locked
                    .resources
                    .iterate_by_type(ResourceType::Subscription)
                    .find(|r| request.is_equivalent(&r.data))
                    .map(|r| r.data.clone());
                match existing {
                    Some(data) => (StatusCode::OK, data),
                    None => {
                        let id = make_id();
                        let ws_href = format!(
                            "ws://{}:{}/x-nmos/query/{}/subscriptions/{}",
                            locked.settings.host_address,
                            locked.settings.query_ws_port,
                            version,
                            id
                        );
                        let data = json!({
                            "id": id,
                            "ws_href": ws_href,
                            "max_update_rate_ms": request.max_update_rate_ms,
                            "persist": request.persist,
                            "secure": request.secure,
                            "resource_path": request.resource_path,
                            "params": request.params,
                        });
                        locked
                            .resources
                            .insert(Resource::new(ResourceType::Subscription, version, data.clone()), true)?;
                        let updated = locked
                            .resources
                            .find(&id)
                            .map(|r| r.updated)
                            .unwrap_or_default();
                        locked.push_events([ResourceEvent::added(
                            ResourceType::Subscription,
                            &id,
                            data.clone(),
                            updated,
                        )]);
                        tracing::info!(id = %id, resource_path = %request.resource_path, "Created subscription");
                        (StatusCode::CREATED, data)
                    }
                }
            };
            model.events.notify_one();

            if status == StatusCode::CREATED {
                if let Some(id) = data.get("id").and_then(Value::as_str) {
                    let location = format!("/x-nmos/query/{}/subscriptions/{}", version, id);
                    if let Ok(value) = HeaderValue::from_str(&location) {
                        res.headers.insert(axum::http::header::LOCATION, value);
                    }
                }
            }
            set_reply(&mut res, status, data);
            Ok((res, true))
        })
    }));

    // GET /subscriptions: list, with the usual filter and paging
    let list_subs_model = model.clone();
    api.support("/subscriptions/?", Method::GET, from_fn(move |req, mut res, _path, params| {
        let model = list_subs_model.clone();
        Box::pin(async move {
            parse_is04_version(&params)?;
            let query = ResourceQuery::from_query_string(&req.query, MatchFlags::DEFAULT)?;
            let locked = model.model.lock().await;
            let (page, total) = filter_paged(
                locked.resources.iterate_by_type(ResourceType::Subscription),
                |r| query.matches(&r.data),
                query.offset,
                query.limit,
            );
            let body: Vec<Value> = page.iter().map(|r| r.data.clone()).collect();
            set_total_count(&mut res, total);
            set_reply(&mut res, StatusCode::OK, Value::Array(body));
            Ok((res, true))
        })
    }));

    // GET /subscriptions/{id}
    let get_sub_model = model.clone();
    api.support(
        &format!("/subscriptions/{}/?", patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = get_sub_model.clone();
            Box::pin(async move {
                parse_is04_version(&params)?;
                let id = &params["resourceId"];
                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(r) if r.type_ == ResourceType::Subscription => {
                        set_reply(&mut res, StatusCode::OK, r.data.clone());
                    }
                    _ => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // DELETE /subscriptions/{id}: only persistent subscriptions may be
    // deleted by clients; non-persistent ones die with their last session
    let delete_sub_model = model.clone();
    api.support(
        &format!("/subscriptions/{}/?", patterns::RESOURCE_ID),
        Method::DELETE,
        from_fn(move |_req, mut res, _path, params| {
            let model = delete_sub_model.clone();
            Box::pin(async move {
                parse_is04_version(&params)?;
                let id = params["resourceId"].clone();
                enum Outcome {
                    Deleted,
                    Forbidden,
                    Missing,
                }
                let outcome = {
                    let mut locked = model.model.lock().await;
                    match locked.resources.find(&id) {
                        Some(r) if r.type_ == ResourceType::Subscription => {
                            let persist = r.data.get("persist").and_then(Value::as_bool).unwrap_or(false);
                            if persist {
                                let removed = locked.resources.erase(&id);
                                let base = locked.resources.strictly_increasing_update();
                                let events = removal_events(&removed, base);
                                locked.push_events(events);
                                Outcome::Deleted
                            } else {
                                Outcome::Forbidden
                            }
                        }
                        _ => Outcome::Missing,
                    }
                };
                match outcome {
                    Outcome::Deleted => {
                        model.events.notify_one();
                        set_status_reply(&mut res, StatusCode::NO_CONTENT);
                    }
                    Outcome::Forbidden => set_status_reply(&mut res, StatusCode::FORBIDDEN),
                    Outcome::Missing => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    // GET /{resourceType}: filtered, paged, downgraded listing
    let list_model = model.clone();
    api.support(
        &format!("/{}/?", patterns::RESOURCE_TYPE),
        Method::GET,
        from_fn(move |req, mut res, _path, params| {
            let model = list_model.clone();
            Box::pin(async move {
                let version = parse_is04_version(&params)?;
                let type_ = resource_type_param(&params)?;
                let query = ResourceQuery::from_query_string(&req.query, MatchFlags::DEFAULT)?;

                let locked = model.model.lock().await;
                let (page, total) = filter_paged(
                    locked.resources.iterate_by_type(type_),
                    |r| is_permitted_downgrade(r, version) && query.matches(&r.data),
                    query.offset,
                    query.limit,
                );
                let body: Vec<Value> = page.iter().map(|r| downgrade(r, version)).collect();
                tracing::debug!(type_ = %type_, count = body.len(), total = total, "Query listing");
                set_total_count(&mut res, total);
                set_reply(&mut res, StatusCode::OK, Value::Array(body));
                Ok((res, true))
            })
        }),
    );

    // GET /{resourceType}/{resourceId}
    let single_model = model;
    api.support(
        &format!("/{}/{}/?", patterns::RESOURCE_TYPE, patterns::RESOURCE_ID),
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let model = single_model.clone();
            Box::pin(async move {
                let version = parse_is04_version(&params)?;
                let type_ = resource_type_param(&params)?;
                let id = &params["resourceId"];

                let locked = model.model.lock().await;
                match locked.resources.find(id) {
                    Some(r) if r.type_ == type_ && is_permitted_downgrade(r, version) => {
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

fn set_total_count(res: &mut crate::router::ApiResponse, total: usize) {
    if let Ok(value) = HeaderValue::from_str(&total.to_string()) {
        res.headers
            .insert(axum::http::HeaderName::from_static("x-total-count"), value);
    }
}

fn resource_type_param(params: &crate::router::RouteParams) -> rnmos_core::Result<ResourceType> {
    params
        .get("resourceType")
        .and_then(|s| ResourceType::from_path_segment(s))
        .ok_or(ApiError::NotFound)
}

/// The validated body of `POST /subscriptions`
struct SubscriptionRequest {
    max_update_rate_ms: u64,
    persist: bool,
    secure: bool,
    resource_path: String,
    params: Value,
}

impl SubscriptionRequest {
    fn from_body(body: &Value) -> rnmos_core::Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::MalformedRequest("subscription must be an object".to_string()))?;

        let resource_path = obj
            .get("resource_path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let valid_path = matches!(resource_path.as_str(), "" | "/")
            || resource_path
                .strip_prefix('/')
                .and_then(ResourceType::from_path_segment)
                .is_some();
        if !valid_path {
            return Err(ApiError::MalformedRequest(format!(
                "bad resource_path: {}",
                resource_path
            )));
        }

        let params = obj.get("params").cloned().unwrap_or_else(|| json!({}));
        if !params.is_object() {
            return Err(ApiError::MalformedRequest(
                "subscription params must be an object".to_string(),
            ));
        }
        // reject unparseable filters at creation, not at first connect
        ResourceQuery::from_params(&params)?;

        Ok(Self {
            max_update_rate_ms: obj
                .get("max_update_rate_ms")
                .and_then(Value::as_u64)
                .unwrap_or(100),
            persist: obj.get("persist").and_then(Value::as_bool).unwrap_or(false),
            secure: obj.get("secure").and_then(Value::as_bool).unwrap_or(false),
            resource_path,
            params,
        })
    }

    /// Whether an existing subscription has the same four filter-defining
    /// fields, making a new one redundant
    fn is_equivalent(&self, data: &Value) -> bool {
        data.get("resource_path").and_then(Value::as_str) == Some(self.resource_path.as_str())
            && data.get("params") == Some(&self.params)
            && data.get("persist").and_then(Value::as_bool) == Some(self.persist)
            && data.get("secure").and_then(Value::as_bool) == Some(self.secure)
    }
}
