//! Renderer selection from `?format=` or the `Accept` header.

use std::sync::Arc;

use axum::http::HeaderValue;

use crate::error::{Result, TensoError};
use crate::renderers::{RenderContext, RendererRegistry, JSON};
use crate::response::Representation;

const DEFAULT_ACCEPT: &str = "application/json";

/// Rendered body plus the content type to send with it.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub renderer: String,
    pub content_type: HeaderValue,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ContentNegotiator {
    enabled: Vec<String>,
    registry: Arc<RendererRegistry>,
}

impl ContentNegotiator {
    /// Every enabled name, and the `json` fallback, must be registered.
    pub fn new(enabled: Vec<String>, registry: Arc<RendererRegistry>) -> Result<Self> {
        if !registry.contains(JSON) {
            return Err(TensoError::Configuration(
                "the json renderer must be registered".to_string(),
            ));
        }

        if let Some(missing) = enabled.iter().find(|name| !registry.contains(name)) {
            return Err(TensoError::Configuration(format!(
                "renderer '{}' is enabled but not registered",
                missing
            )));
        }

        Ok(Self { enabled, registry })
    }

    /// Name of the renderer for a request. The first enabled name found as
    /// a substring of any accept token wins; otherwise `json`.
    pub fn select(&self, format: Option<&str>, accept: Option<&str>) -> &str {
        let accept = format
            .filter(|value| !value.is_empty())
            .or(accept.filter(|value| !value.is_empty()))
            .unwrap_or(DEFAULT_ACCEPT);
        let tokens: Vec<&str> = accept.split(';').map(str::trim).collect();

        self.enabled
            .iter()
            .find(|name| tokens.iter().any(|token| token.contains(name.as_str())))
            .map(String::as_str)
            .unwrap_or(JSON)
    }

    pub fn negotiate(
        &self,
        rep: &Representation,
        format: Option<&str>,
        accept: Option<&str>,
        ctx: &RenderContext<'_>,
    ) -> Result<Negotiated> {
        let name = self.select(format, accept);
        let renderer = self.registry.get(name).ok_or_else(|| {
            TensoError::Configuration(format!("renderer '{}' is not registered", name))
        })?;

        Ok(Negotiated {
            renderer: name.to_string(),
            content_type: renderer.content_type().clone(),
            body: renderer.render(rep, ctx)?,
        })
    }
}
