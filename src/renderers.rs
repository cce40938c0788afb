//! Renderer registry.
//!
//! A renderer turns a `Representation` into the response body for one
//! MIME type. The registry is built before the server starts and only
//! read afterward.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::error::{Result, TensoError};
use crate::response::Representation;

pub const JSON: &str = "json";
pub const JSONL: &str = "jsonl";
pub const JAVASCRIPT: &str = "javascript";
pub const PLAIN: &str = "plain";

const DEFAULT_CALLBACK: &str = "callback";

/// Request facts available to a renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub query: &'a HashMap<String, String>,
    pub headers: &'a HeaderMap,
}

pub type RenderFn =
    Arc<dyn Fn(&Representation, &RenderContext<'_>) -> Result<String> + Send + Sync>;

#[derive(Clone)]
pub struct Renderer {
    content_type: HeaderValue,
    render: RenderFn,
}

impl Renderer {
    pub fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }

    pub fn render(&self, rep: &Representation, ctx: &RenderContext<'_>) -> Result<String> {
        (self.render)(rep, ctx)
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RendererRegistry {
    renderers: HashMap<String, Renderer>,
}

impl RendererRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `json`, `jsonl`, `javascript` and `plain`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(JSON, HeaderValue::from_static("application/json"), render_json);
        registry.insert(JSONL, HeaderValue::from_static("application/jsonl"), render_jsonl);
        registry.insert(
            JAVASCRIPT,
            HeaderValue::from_static("application/javascript"),
            render_javascript,
        );
        registry.insert(
            PLAIN,
            HeaderValue::from_static("text/plain; charset=utf-8"),
            render_plain,
        );
        registry
    }

    /// Register (or replace) the renderer for `name`.
    pub fn register<F>(&mut self, name: &str, content_type: &str, render: F) -> Result<&mut Self>
    where
        F: Fn(&Representation, &RenderContext<'_>) -> Result<String> + Send + Sync + 'static,
    {
        let content_type = HeaderValue::from_str(content_type).map_err(|e| {
            TensoError::Configuration(format!(
                "invalid content type '{}' for renderer '{}': {}",
                content_type, name, e
            ))
        })?;

        self.insert(name, content_type, render);
        Ok(self)
    }

    fn insert<F>(&mut self, name: &str, content_type: HeaderValue, render: F)
    where
        F: Fn(&Representation, &RenderContext<'_>) -> Result<String> + Send + Sync + 'static,
    {
        self.renderers.insert(
            name.to_string(),
            Renderer {
                content_type,
                render: Arc::new(render),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Renderer> {
        self.renderers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.renderers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.renderers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn render_json(rep: &Representation, ctx: &RenderContext<'_>) -> Result<String> {
    if ctx.query.contains_key("pretty") {
        Ok(serde_json::to_string_pretty(rep)?)
    } else {
        Ok(serde_json::to_string(rep)?)
    }
}

/// One line per element of an array result, otherwise the envelope.
fn render_jsonl(rep: &Representation, _ctx: &RenderContext<'_>) -> Result<String> {
    match payload(rep) {
        Some(Value::Array(items)) => {
            let lines = items
                .iter()
                .map(serde_json::to_string)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(lines.join("\n"))
        }
        _ => Ok(serde_json::to_string(rep)?),
    }
}

/// JSONP: the envelope passed to the `callback` query parameter.
fn render_javascript(rep: &Representation, ctx: &RenderContext<'_>) -> Result<String> {
    let callback = ctx
        .query
        .get("callback")
        .map(String::as_str)
        .filter(|name| is_callback_name(name))
        .unwrap_or(DEFAULT_CALLBACK);

    Ok(format!("{}({});", callback, serde_json::to_string(rep)?))
}

fn render_plain(rep: &Representation, _ctx: &RenderContext<'_>) -> Result<String> {
    if let Some(error) = &rep.error {
        return Ok(error.clone());
    }

    Ok(payload(rep).map(plain_text).unwrap_or_default())
}

/// The result value, unwrapped from the hypermedia envelope when present.
fn payload(rep: &Representation) -> Option<&Value> {
    match &rep.data {
        Some(Value::Object(envelope))
            if envelope.len() == 2
                && envelope.contains_key("link")
                && envelope.contains_key("result") =>
        {
            envelope.get("result")
        }
        other => other.as_ref(),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(plain_text).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_callback_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'))
}
