//! Regex-based API router
//!
//! Every NMOS API in this registry is built on the same dispatch layer: an
//! ordered list of routes, each a regex with named captures, a match mode
//! (entire path or prefix), an optional method, and a handler.
//!
//! # Dispatch
//!
//! For each route in declaration order, the route-relative path (the request
//! path minus the prefix consumed by enclosing mounts) is matched against
//! the pattern. On a match, named captures merge into the accumulated
//! parameters (new values win) and:
//!
//! - method matches (or the route is method-agnostic) → the handler runs;
//!   returning `false` means "the response is final, stop matching", `true`
//!   means "continue to later routes"
//! - method differs → the status becomes `405 Method Not Allowed` (unless a
//!   handler already set one) and the route's method is appended to the
//!   `Allow` header, then matching continues
//!
//! After all routes, a still-unset status means no route claimed the
//! request; the serving layer turns that into `404 Not Found`.
//!
//! # Mounting
//!
//! `mount` registers a prefix-match route, usually with a sub-router as the
//! handler; the matched prefix is appended to the accumulated route path so
//! the sub-router dispatches on the remainder. This is how each API version
//! lives in its own router.
//!
//! # Handlers
//!
//! A handler is a value accepting `(request, response, route_path, params)`
//! and yielding the response plus a continuation decision. Failure is a
//! `Result` error: the per-router exception handler (if installed) converts
//! it into an error reply; if the exception handler itself fails, the error
//! propagates to the serving layer.

use regex::Regex;
use rnmos_core::{ApiError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};

/// Named path parameters accumulated along the route
pub type RouteParams = HashMap<String, String>;

/// The request as seen by handlers: method, decoded path, raw query, body
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Percent-decoded path
    pub path: String,
    /// Raw (still encoded) query string
    pub query: String,
    pub headers: HeaderMap,
    pub body: axum::body::Bytes,
}

impl ApiRequest {
    /// Parse the request body as JSON
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::MalformedRequest(format!("bad JSON body: {}", e)))
    }
}

/// Response body variants the APIs produce
#[derive(Debug, Clone, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(Value),
    /// Non-JSON content, e.g. the SDP transport file
    Content {
        content_type: String,
        body: String,
    },
}

/// The response a handler builds up
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    /// Unset until some handler (or the 405 machinery) decides
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Future returned by handlers: the response plus "continue matching?"
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(ApiResponse, bool)>> + Send>>;

/// A route handler
pub trait RouteHandler: Send + Sync {
    fn handle(
        &self,
        req: Arc<ApiRequest>,
        res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> HandlerFuture;
}

struct FnHandler<F>(F);

impl<F> RouteHandler for FnHandler<F>
where
    F: Fn(Arc<ApiRequest>, ApiResponse, String, RouteParams) -> HandlerFuture + Send + Sync,
{
    fn handle(
        &self,
        req: Arc<ApiRequest>,
        res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> HandlerFuture {
        (self.0)(req, res, route_path, params)
    }
}

/// Wrap a closure as a route handler
pub fn from_fn<F>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(Arc<ApiRequest>, ApiResponse, String, RouteParams) -> HandlerFuture
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

/// A per-router fallback for handler failures
pub trait ExceptionHandler: Send + Sync {
    fn handle(
        &self,
        error: ApiError,
        req: Arc<ApiRequest>,
        res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> HandlerFuture;
}

struct FnExceptionHandler<F>(F);

impl<F> ExceptionHandler for FnExceptionHandler<F>
where
    F: Fn(ApiError, Arc<ApiRequest>, ApiResponse, String, RouteParams) -> HandlerFuture
        + Send
        + Sync,
{
    fn handle(
        &self,
        error: ApiError,
        req: Arc<ApiRequest>,
        res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> HandlerFuture {
        (self.0)(error, req, res, route_path, params)
    }
}

/// Wrap a closure as an exception handler
pub fn from_exception_fn<F>(f: F) -> Arc<dyn ExceptionHandler>
where
    F: Fn(ApiError, Arc<ApiRequest>, ApiResponse, String, RouteParams) -> HandlerFuture
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnExceptionHandler(f))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Entire,
    Prefix,
}

#[derive(Clone)]
struct Route {
    regex: Regex,
    method: Option<Method>,
    handler: Arc<dyn RouteHandler>,
}

/// The router: an ordered route list plus an optional exception handler
#[derive(Clone, Default)]
pub struct ApiRouter {
    routes: Vec<Route>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl ApiRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entire-match route for one method
    pub fn support(&mut self, pattern: &str, method: Method, handler: Arc<dyn RouteHandler>) {
        self.insert(MatchMode::Entire, pattern, Some(method), handler);
    }

    /// Append an entire-match route for any method
    pub fn support_all(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) {
        self.insert(MatchMode::Entire, pattern, None, handler);
    }

    /// Append a prefix-match route for one method
    pub fn mount(&mut self, pattern: &str, method: Method, handler: Arc<dyn RouteHandler>) {
        self.insert(MatchMode::Prefix, pattern, Some(method), handler);
    }

    /// Append a prefix-match route for any method
    ///
    /// The usual way to hang a sub-router (which is itself a handler) off a
    /// path prefix; the sub-router sees the remainder of the path.
    pub fn mount_all(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) {
        self.insert(MatchMode::Prefix, pattern, None, handler);
    }

    /// Install the per-router fallback for handler failures
    pub fn set_exception_handler(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handler = Some(handler);
    }

    fn insert(
        &mut self,
        mode: MatchMode,
        pattern: &str,
        method: Option<Method>,
        handler: Arc<dyn RouteHandler>,
    ) {
        let anchored = match mode {
            MatchMode::Entire => format!("^(?:{})$", pattern),
            MatchMode::Prefix => format!("^(?:{})", pattern),
        };
        match Regex::new(&anchored) {
            Ok(regex) => self.routes.push(Route {
                regex,
                method,
                handler,
            }),
            Err(e) => {
                tracing::error!(pattern = pattern, error = %e, "Bad route pattern; route ignored");
            }
        }
    }

    /// Dispatch a request through the route list
    ///
    /// `route_path` is the path prefix consumed by enclosing mounts; the
    /// returned bool is the continuation decision (`true` when no route
    /// produced a final response).
    pub async fn dispatch(
        &self,
        req: Arc<ApiRequest>,
        mut res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> Result<(ApiResponse, bool)> {
        let relative = req.path.get(route_path.len()..).unwrap_or("").to_string();

        for route in &self.routes {
            let Some(caps) = route.regex.captures(&relative) else {
                continue;
            };
            let matched = caps.get(0).map(|m| m.as_str()).unwrap_or("");
            let merged_path = format!("{}{}", route_path, matched);
            // new captures replace accumulated parameters of the same name
            let mut merged_params = params.clone();
            for name in route.regex.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    merged_params.insert(name.to_string(), m.as_str().to_string());
                }
            }

            let method_matches = route
                .method
                .as_ref()
                .map(|m| *m == req.method)
                .unwrap_or(true);

            if method_matches {
                let saved = res.clone();
                match route
                    .handler
                    .handle(req.clone(), res, merged_path.clone(), merged_params.clone())
                    .await
                {
                    Ok((next, true)) => res = next,
                    Ok((next, false)) => return Ok((next, false)),
                    Err(error) => match &self.exception_handler {
                        Some(handler) => {
                            // if the exception handler itself fails, propagate
                            match handler
                                .handle(error, req.clone(), saved, merged_path, merged_params)
                                .await?
                            {
                                (next, true) => res = next,
                                (next, false) => return Ok((next, false)),
                            }
                        }
                        None => return Err(error),
                    },
                }
            } else {
                if res.status.is_none() {
                    res.status = Some(StatusCode::METHOD_NOT_ALLOWED);
                }
                if let Some(method) = &route.method {
                    if let Ok(value) = HeaderValue::from_str(method.as_str()) {
                        res.headers.append(axum::http::header::ALLOW, value);
                    }
                }
            }
        }

        Ok((res, true))
    }
}

impl RouteHandler for ApiRouter {
    fn handle(
        &self,
        req: Arc<ApiRequest>,
        res: ApiResponse,
        route_path: String,
        params: RouteParams,
    ) -> HandlerFuture {
        let router = self.clone();
        Box::pin(async move { router.dispatch(req, res, route_path, params).await })
    }
}
