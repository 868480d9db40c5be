//! The Settings API
//!
//! Settings can be read and changed at runtime: `GET /settings/all` returns
//! the current document, `POST /settings/all` merges a JSON object into it.
//! `logging_level` takes effect on the log layer immediately; a changed
//! expiry interval is picked up on the GC worker's next pass.

use crate::api_utils::{add_api_finally_handler, set_reply};
use crate::log_model::LogHandle;
use crate::model::RegistryModel;
use crate::router::{from_fn, ApiRouter, Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

/// Build the Settings API router
pub fn make_settings_api(model: Arc<RegistryModel>, log: LogHandle) -> ApiRouter {
    let mut api = ApiRouter::new();

    api.support("/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["settings/"]));
            Ok((res, true))
        })
    }));

    api.support("/settings/?", Method::GET, from_fn(|_req, mut res, _path, _params| {
        Box::pin(async move {
            set_reply(&mut res, StatusCode::OK, json!(["all/"]));
            Ok((res, true))
        })
    }));

    let get_model = model.clone();
    api.support("/settings/all/?", Method::GET, from_fn(move |_req, mut res, _path, _params| {
        let model = get_model.clone();
        Box::pin(async move {
            let locked = model.model.lock().await;
            set_reply(&mut res, StatusCode::OK, locked.settings.to_json());
            Ok((res, true))
        })
    }));

    let post_model = model;
    api.support("/settings/all/?", Method::POST, from_fn(move |req, mut res, _path, _params| {
        let model = post_model.clone();
        let log = log.clone();
        Box::pin(async move {
            let patch = req.json()?;
            let merged = {
                let mut locked = model.model.lock().await;
                locked.settings.merge(&patch)?;
                tracing::info!("Settings changed");
                if let Ok(mut log_model) = log.lock() {
                    log_model.set_level(locked.settings.logging_level);
                }
                locked.settings.to_json()
            };
            // the expiry interval may have changed
            model.expiration.notify_one();
            set_reply(&mut res, StatusCode::OK, merged);
            Ok((res, true))
        })
    }));

    add_api_finally_handler(&mut api);
    api
}
