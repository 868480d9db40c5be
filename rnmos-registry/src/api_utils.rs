//! Shared API plumbing
//!
//! Reply helpers, the common route patterns, the per-router "finally"
//! exception handler, version parsing, and the bridge that serves an
//! [`ApiRouter`] from an axum application.

use crate::router::{
    from_exception_fn, ApiRequest, ApiResponse, ApiRouter, HeaderValue, ResponseBody, RouteParams,
    StatusCode,
};
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use percent_encoding::percent_decode_str;
use rnmos_core::{ApiError, ApiVersion, ErrorBody, Result, IS04_VERSIONS, IS05_VERSIONS};
use serde_json::Value;
use std::sync::Arc;

/// Named sub-expressions shared by the API routers
pub mod patterns {
    /// Any registrable resource type, plural
    pub const RESOURCE_TYPE: &str =
        "(?P<resourceType>nodes|devices|sources|flows|senders|receivers)";
    /// Node API subresources (everything under a node but the node itself)
    pub const SUBRESOURCE_TYPE: &str =
        "(?P<resourceType>devices|sources|flows|senders|receivers)";
    /// Connection API connector types
    pub const CONNECTOR_TYPE: &str = "(?P<resourceType>senders|receivers)";
    /// Resource and subscription ids
    pub const RESOURCE_ID: &str = "(?P<resourceId>[^/]+)";
    /// An API version path segment
    pub const VERSION: &str = "(?P<version>v[0-9]+\\.[0-9]+)";
}

/// Set a JSON reply
pub fn set_reply(res: &mut ApiResponse, status: StatusCode, body: Value) {
    res.status = Some(status);
    res.body = ResponseBody::Json(body);
}

/// Set a status with no body
pub fn set_status_reply(res: &mut ApiResponse, status: StatusCode) {
    res.status = Some(status);
    res.body = ResponseBody::Empty;
}

/// Set a non-JSON reply, e.g. the SDP transport file
pub fn set_content_reply(res: &mut ApiResponse, status: StatusCode, content_type: &str, body: String) {
    res.status = Some(status);
    res.body = ResponseBody::Content {
        content_type: content_type.to_string(),
        body,
    };
}

/// Set the NMOS error reply for a failed handler
pub fn set_error_reply(res: &mut ApiResponse, error: &ApiError) {
    let body = error.to_body();
    res.status = StatusCode::from_u16(body.code).ok();
    res.body = ResponseBody::Json(serde_json::to_value(&body).unwrap_or(Value::Null));
}

/// Install the standard exception handler: log, reply with the mapped
/// status and `{code, error, debug}` body, continue matching
pub fn add_api_finally_handler(api: &mut ApiRouter) {
    api.set_exception_handler(from_exception_fn(|error, req, mut res, _path, _params| {
        Box::pin(async move {
            tracing::error!(path = %req.path, error = %error, "API handler failed");
            set_error_reply(&mut res, &error);
            Ok((res, true))
        })
    }));
}

/// Parse and validate the IS-04 version captured from the route
pub fn parse_is04_version(params: &RouteParams) -> Result<ApiVersion> {
    parse_version(params, &IS04_VERSIONS)
}

/// Parse and validate the IS-05 version captured from the route
pub fn parse_is05_version(params: &RouteParams) -> Result<ApiVersion> {
    parse_version(params, &IS05_VERSIONS)
}

fn parse_version(params: &RouteParams, supported: &[ApiVersion]) -> Result<ApiVersion> {
    let raw = params
        .get("version")
        .ok_or_else(|| ApiError::Internal("route has no version capture".to_string()))?;
    let version: ApiVersion = raw
        .parse()
        .map_err(|_| ApiError::UnsupportedVersion(raw.clone()))?;
    if supported.contains(&version) {
        Ok(version)
    } else {
        Err(ApiError::UnsupportedVersion(raw.clone()))
    }
}

/// The navigation document listing supported versions, e.g. `["v1.0/",...]`
pub fn versions_reply(versions: &[ApiVersion]) -> Value {
    Value::Array(
        versions
            .iter()
            .map(|v| Value::String(format!("{}/", v)))
            .collect(),
    )
}

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Serve one request through a router, applying the end-of-dispatch rules
///
/// A still-unset status becomes 404; error statuses with no body get the
/// standard error body; dispatch errors that escaped the exception handler
/// become 500s.
pub async fn handle_api_request(api: &ApiRouter, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = ApiError::MalformedRequest(format!("unreadable body: {}", e));
            let mut res = ApiResponse::new();
            set_error_reply(&mut res, &error);
            return into_response(res);
        }
    };

    let path = percent_decode_str(parts.uri.path())
        .decode_utf8_lossy()
        .into_owned();
    let req = Arc::new(ApiRequest {
        method: parts.method,
        path,
        query: parts.uri.query().unwrap_or("").to_string(),
        headers: parts.headers,
        body: bytes,
    });

    let outcome = api
        .dispatch(req, ApiResponse::new(), String::new(), RouteParams::new())
        .await;

    let mut res = match outcome {
        Ok((res, _)) => res,
        Err(error) => {
            tracing::error!(error = %error, "Unhandled API error");
            let mut res = ApiResponse::new();
            set_error_reply(&mut res, &error);
            res
        }
    };

    if res.status.is_none() {
        set_error_reply(&mut res, &ApiError::NotFound);
    }
    if let (Some(status), ResponseBody::Empty) = (res.status, &res.body) {
        if status.is_client_error() || status.is_server_error() {
            let body = ErrorBody {
                code: status.as_u16(),
                error: status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
                debug: None,
            };
            res.body = ResponseBody::Json(serde_json::to_value(&body).unwrap_or(Value::Null));
        }
    }

    into_response(res)
}

fn into_response(res: ApiResponse) -> Response {
    let status = res.status.unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(res.headers);
    }
    let built = match res.body {
        ResponseBody::Empty => builder.body(Body::empty()),
        ResponseBody::Json(value) => {
            builder = builder.header(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            builder.body(Body::from(value.to_string()))
        }
        ResponseBody::Content { content_type, body } => {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                builder = builder.header(axum::http::header::CONTENT_TYPE, value);
            }
            builder.body(Body::from(body))
        }
    };
    built.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build response");
        Response::new(Body::empty())
    })
}

/// Wrap a router as an axum application
///
/// The router is the application: axum only supplies the listener and body
/// plumbing, so the whole path space falls through to our dispatch.
pub fn make_app(api: ApiRouter) -> axum::Router {
    axum::Router::new().fallback(move |request: Request| {
        let api = api.clone();
        async move { handle_api_request(&api, request).await }
    })
}
