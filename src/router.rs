//! Route table and dispatch.
//!
//! Lookup order for a request:
//! - exact path key for the normalized method
//! - patterns in registration order, `:name` segments matching anything,
//!   anchored and case-insensitive; first match wins
//!
//! Every pattern is compiled once at registration, including ones without
//! placeholders, which makes plain regular expressions valid routes.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use futures::FutureExt;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{Result, TensoError};

/// What a dynamic handler sees of the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub client_id: String,
}

impl RequestContext {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// What a handler produces; becomes a `Representation` downstream.
#[derive(Debug, Clone)]
pub struct Reply {
    pub body: Option<Value>,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self::with_status(body, StatusCode::OK)
    }

    pub fn with_status(body: Value, status: StatusCode) -> Self {
        Self {
            body: Some(body),
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            body: None,
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply>> + Send>>;
pub type DynamicHandler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// A route's target, decided when the route is registered.
#[derive(Clone)]
pub enum Handler {
    Static(Value),
    Dynamic(DynamicHandler),
}

impl Handler {
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        Handler::Dynamic(Arc::new(move |ctx| Box::pin(f(ctx))))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Handler::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    pattern: String,
    matcher: Regex,
    handler: Handler,
}

#[derive(Debug, Clone, Default)]
struct MethodRoutes {
    ordered: Vec<Route>,
    exact: HashMap<String, usize>,
}

/// Routes keyed by lowercased method, then by path pattern.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    methods: HashMap<String, MethodRoutes>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` and `pattern`. Registering the same
    /// pattern again replaces the handler but keeps its original position.
    pub fn route(&mut self, method: &str, pattern: &str, handler: Handler) -> Result<&mut Self> {
        let matcher = compile_pattern(pattern)?;
        let routes = self.methods.entry(method.to_lowercase()).or_default();

        match routes.exact.get(pattern) {
            Some(&index) => routes.ordered[index].handler = handler,
            None => {
                routes.exact.insert(pattern.to_string(), routes.ordered.len());
                routes.ordered.push(Route {
                    pattern: pattern.to_string(),
                    matcher,
                    handler,
                });
            }
        }

        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route("get", pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route("post", pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route("put", pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route("patch", pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: Handler) -> Result<&mut Self> {
        self.route("delete", pattern, handler)
    }

    pub fn len(&self) -> usize {
        self.methods.values().map(|routes| routes.ordered.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `(method, path)` to the handler and the pattern that matched.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(&str, &Handler)> {
        let routes = self.methods.get(&normalize_method(method))?;

        if let Some(&index) = routes.exact.get(path) {
            let route = &routes.ordered[index];
            return Some((route.pattern.as_str(), &route.handler));
        }

        routes
            .ordered
            .iter()
            .find(|route| route.matcher.is_match(path))
            .map(|route| (route.pattern.as_str(), &route.handler))
    }

    pub async fn dispatch(&self, ctx: RequestContext) -> Result<Reply> {
        let (pattern, handler) = self
            .lookup(&ctx.method, ctx.path())
            .ok_or(TensoError::NotFound)?;

        tracing::debug!(method = %ctx.method, path = %ctx.path(), pattern, "route matched");

        match handler {
            Handler::Static(value) => Ok(Reply::ok(value.clone())),
            Handler::Dynamic(handler) => {
                // A panicking handler fails its own request only.
                let future = panic::catch_unwind(AssertUnwindSafe(|| handler(ctx)))
                    .map_err(|payload| handler_panic(pattern, payload.as_ref()))?;

                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(handler_panic(pattern, payload.as_ref())))
            }
        }
    }
}

fn handler_panic(pattern: &str, payload: &(dyn Any + Send)) -> TensoError {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    TensoError::Handler(format!("handler for '{}' panicked: {}", pattern, detail))
}

/// `HEAD` and `OPTIONS` resolve against `GET` routes.
pub fn normalize_method(method: &Method) -> String {
    if *method == Method::HEAD || *method == Method::OPTIONS {
        "get".to_string()
    } else {
        method.as_str().to_lowercase()
    }
}

/// Turn a route pattern into its anchored, case-insensitive matcher.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let expanded = expand_placeholders(pattern);

    RegexBuilder::new(&format!("^{}$", expanded))
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            TensoError::Configuration(format!("invalid route pattern '{}': {}", pattern, e))
        })
}

/// Replace every `:name` placeholder with `.*`.
fn expand_placeholders(pattern: &str) -> String {
    let mut expanded = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let starts_name = c == ':'
            && chars
                .peek()
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_');

        if starts_name {
            while chars
                .peek()
                .is_some_and(|next| next.is_ascii_alphanumeric() || *next == '_')
            {
                chars.next();
            }
            expanded.push_str(".*");
        } else {
            expanded.push(c);
        }
    }

    expanded
}
