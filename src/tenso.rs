//! Per-request pipeline.
//!
//! `Tenso::handle` runs a request through admission, dispatch, composition,
//! hypermedia decoration and content negotiation. Every stage either hands
//! its output forward or ends the request; nothing loops back.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{debug, error, info};
use url::form_urlencoded;

use crate::client_id::ClientIdResolver;
use crate::clock::{Clock, SystemClock};
use crate::config::ApiConfig;
use crate::config_validator::ConfigValidator;
use crate::error::{ErrorResponse, Result, TensoError};
use crate::gate::{AdmissionGate, Anonymous, Authenticator, Terminal};
use crate::hypermedia::{decorate, link_header};
use crate::negotiation::ContentNegotiator;
use crate::rate_limiter::{RateLimiter, RateOverride};
use crate::renderers::{RenderContext, RendererRegistry};
use crate::response::{compose, Representation};
use crate::router::{Handler, Reply, RequestContext, RouteTable};

/// A configured request pipeline. Built once, shared by every request.
#[derive(Debug)]
pub struct Tenso {
    config: ApiConfig,
    routes: RouteTable,
    gate: AdmissionGate,
    negotiator: ContentNegotiator,
    resolver: ClientIdResolver,
    limiter: Option<RateLimiter>,
}

pub struct TensoBuilder {
    config: ApiConfig,
    routes: Vec<(String, String, Handler)>,
    registry: RendererRegistry,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    rate_override: Option<RateOverride>,
}

impl TensoBuilder {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            registry: RendererRegistry::with_defaults(),
            authenticator: Arc::new(Anonymous),
            clock: Arc::new(SystemClock),
            rate_override: None,
        }
    }

    /// Add a route. Code routes are registered after the ones declared in
    /// configuration and replace them on the same method and pattern.
    pub fn route(mut self, method: &str, pattern: &str, handler: Handler) -> Self {
        self.routes
            .push((method.to_lowercase(), pattern.to_string(), handler));
        self
    }

    pub fn get(self, pattern: &str, handler: Handler) -> Self {
        self.route("get", pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: Handler) -> Self {
        self.route("post", pattern, handler)
    }

    pub fn renderer<F>(mut self, name: &str, content_type: &str, render: F) -> Result<Self>
    where
        F: Fn(&Representation, &RenderContext<'_>) -> Result<String> + Send + Sync + 'static,
    {
        self.registry.register(name, content_type, render)?;
        Ok(self)
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rate_override(mut self, rate_override: RateOverride) -> Self {
        self.rate_override = Some(rate_override);
        self
    }

    pub fn build(self) -> Result<Tenso> {
        ConfigValidator::validate_api_config(&self.config, &self.registry)?;

        let mut routes = RouteTable::new();
        for (method, declared) in &self.config.routes {
            for (pattern, value) in declared {
                routes.route(method, pattern, Handler::Static(value.clone()))?;
            }
        }
        for (method, pattern, handler) in self.routes {
            routes.route(&method, &pattern, handler)?;
        }

        let limiter = if self.config.rate.enabled {
            let limiter = RateLimiter::with_clock(
                self.config.rate.limit,
                self.config.rate.window_seconds(),
                self.clock,
            )?;
            Some(match self.rate_override {
                Some(rate_override) => limiter.with_override(rate_override),
                None => limiter,
            })
        } else {
            None
        };

        let gate = AdmissionGate::new(&self.config, limiter.clone(), self.authenticator)?;
        let negotiator =
            ContentNegotiator::new(self.config.renderers.clone(), Arc::new(self.registry))?;
        let resolver = ClientIdResolver::new(self.config.session_cookie.clone());

        info!(
            routes = routes.len(),
            rate_limited = limiter.is_some(),
            hardened = self.config.hardened,
            "request pipeline ready"
        );

        Ok(Tenso {
            config: self.config,
            routes,
            gate,
            negotiator,
            resolver,
            limiter,
        })
    }
}

impl Tenso {
    pub fn builder(config: ApiConfig) -> TensoBuilder {
        TensoBuilder::new(config)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The shared limiter, `None` when rate limiting is disabled.
    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    pub async fn handle(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let client_id = self
            .resolver
            .resolve(&parts, self.gate.is_authenticated(&parts));

        let admission = match self.gate.admit(&parts, &client_id) {
            Ok(admission) => admission,
            Err(Terminal::Redirect { location, headers }) => {
                return self.redirect(&parts, &location, headers);
            }
            Err(Terminal::Reject { error, headers }) => {
                return self.failure(&parts, &client_id, error, headers);
            }
        };

        let mut headers = admission.headers;

        let reply = match self.dispatch(&parts, body, client_id.clone()).await {
            Ok(reply) => reply,
            Err(error) => return self.failure(&parts, &client_id, error, headers),
        };

        headers.extend(reply.headers);

        match compose(reply.body.as_ref(), None, Some(reply.status)) {
            Ok(rep) => self.render(&parts, rep, headers),
            Err(error) => self.failure(&parts, &client_id, error, headers),
        }
    }

    async fn dispatch(&self, parts: &Parts, body: Body, client_id: String) -> Result<Reply> {
        let body = read_body(body, self.config.max_body_bytes).await?;

        let ctx = RequestContext {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            query: parse_query(parts),
            body,
            client_id,
        };

        self.routes.dispatch(ctx).await
    }

    fn redirect(&self, parts: &Parts, location: &str, mut headers: HeaderMap) -> Response {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                headers.insert(LOCATION, value);
                self.render(parts, Representation::redirect(StatusCode::FOUND), headers)
            }
            Err(e) => {
                let error = TensoError::Internal(format!("invalid redirect '{}': {}", location, e));
                self.failure(parts, "", error, headers)
            }
        }
    }

    fn failure(
        &self,
        parts: &Parts,
        client_id: &str,
        error: TensoError,
        headers: HeaderMap,
    ) -> Response {
        if error.is_fault() {
            error!(
                method = %parts.method,
                path = %parts.uri.path(),
                client_id = %client_id,
                error = %error,
                "request failed"
            );
        } else {
            debug!(
                method = %parts.method,
                path = %parts.uri.path(),
                client_id = %client_id,
                status = %error.status(),
                "request rejected"
            );
        }

        let rep = Representation::from_error(&error, self.config.hardened);
        self.render(parts, rep, headers)
    }

    fn render(&self, parts: &Parts, mut rep: Representation, mut headers: HeaderMap) -> Response {
        let links = decorate(&mut rep, &parts.uri, &parts.headers, self.config.page_size);
        if let Some(value) = link_header(&links).and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(LINK, value);
        }

        let query = parse_query(parts);
        let ctx = RenderContext {
            query: &query,
            headers: &parts.headers,
        };
        let format = query.get("format").map(String::as_str);
        let accept = parts.headers.get(ACCEPT).and_then(|v| v.to_str().ok());

        let negotiated = match self.negotiator.negotiate(&rep, format, accept, &ctx) {
            Ok(negotiated) => negotiated,
            Err(error) => {
                error!(error = %error, "rendering failed");
                let body = ErrorResponse::from_tenso_error(&error, self.config.hardened);
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
            }
        };

        headers.insert(CONTENT_TYPE, negotiated.content_type);

        let body = if parts.method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(negotiated.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = rep.status_code();
        response.headers_mut().extend(headers);
        response
    }
}

/// Request body as JSON when it parses, otherwise as a JSON string.
async fn read_body(body: Body, limit: usize) -> Result<Option<Value>> {
    let bytes = to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, limit, "request body rejected");
        TensoError::PayloadTooLarge
    })?;

    if bytes.is_empty() {
        return Ok(None);
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(Some(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))),
    }
}

fn parse_query(parts: &Parts) -> HashMap<String, String> {
    parts
        .uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}
