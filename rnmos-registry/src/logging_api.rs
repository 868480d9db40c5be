//! The Logging API
//!
//! Serves the in-memory log ring buffer with the same filter engine as the
//! Query API, but with substring, case-insensitive basic matching — the
//! mode that makes log search usable.

use crate::api_utils::{add_api_finally_handler, set_reply, set_status_reply};
use crate::log_model::LogHandle;
use crate::query::{filter_paged, MatchFlags, ResourceQuery};
use crate::router::{from_fn, ApiRouter, HeaderValue, Method, StatusCode};
use rnmos_core::ApiError;
use serde_json::{json, Value};

/// Build the Logging API router
pub fn make_logging_api(log: LogHandle) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["log/"]));
            Ok((res, true))
        })
    }));

    api.support("/log/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["events/"]));
            Ok((res, true))
        })
    }));

    // GET /log/events: filtered, paged log search
    let events_log = log.clone();
    api.support("/log/events/?", Method::GET, from_fn(move |req, mut res, _path, _params| {
        let log = events_log.clone();
        Box::pin(async move {
            let query = ResourceQuery::from_query_string(&req.query, MatchFlags::SUBSTR_ICASE)?;
            let locked = log
                .lock()
                .map_err(|_| ApiError::Internal("log model poisoned".to_string()))?;
            let (page, total) = filter_paged(
                locked.iterate(),
                |event| query.matches(event),
                query.offset,
                query.limit,
            );
            let body: Vec<Value> = page.into_iter().cloned().collect();
            if let Ok(value) = HeaderValue::from_str(&total.to_string()) {
                res.headers
                    .insert(axum::http::HeaderName::from_static("x-total-count"), value);
            }
            set_reply(&mut res, StatusCode::OK, Value::Array(body));
            Ok((res, true))
        })
    }));

    // DELETE /log/events: clear the buffer (selective deletion is not
    // supported)
    let delete_log = log.clone();
    api.support("/log/events/?", Method::DELETE, from_fn(move |req, mut res, _path, _params| {
        let log = delete_log.clone();
        Box::pin(async move {
            if req.query.is_empty() {
                let mut locked = log
                    .lock()
                    .map_err(|_| ApiError::Internal("log model poisoned".to_string()))?;
                locked.clear();
                set_status_reply(&mut res, StatusCode::NO_CONTENT);
            } else {
                set_status_reply(&mut res, StatusCode::NOT_IMPLEMENTED);
            }
            Ok((res, true))
        })
    }));

    // GET /log/events/{id}
    let single_log = log;
    api.support(
        "/log/events/(?P<eventId>[^/]+)/?",
        Method::GET,
        from_fn(move |_req, mut res, _path, params| {
            let log = single_log.clone();
            Box::pin(async move {
                let id = &params["eventId"];
                let locked = log
                    .lock()
                    .map_err(|_| ApiError::Internal("log model poisoned".to_string()))?;
                match locked.find(id) {
                    Some(event) => set_reply(&mut res, StatusCode::OK, event.clone()),
                    None => set_status_reply(&mut res, StatusCode::NOT_FOUND),
                }
                Ok((res, true))
            })
        }),
    );

    add_api_finally_handler(&mut api);
    api
}
