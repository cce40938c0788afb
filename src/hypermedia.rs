//! Hypermedia decoration of successful representations.
//!
//! Links are synthesized from the request URL and from key names in the
//! result: `id`/`_id` point at the item inside the current collection, keys
//! ending in `_guid`, `_uuid`, `_id`, `_url` or `_uri` point at a related
//! collection named after the key. Arrays are paginated with `page` and
//! `page_size`. The result is wrapped as `{"link": [...], "result": ...}`.
//!
//! Collection names come from a naive pluralization (`category_id` becomes
//! `categories`). It is best-effort and intentionally not a general
//! inflector.

use std::collections::HashSet;

use axum::http::header::HOST;
use axum::http::{HeaderMap, Uri};
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use crate::response::Representation;

pub const DEFAULT_PAGE_SIZE: usize = 5;

const RELATED_SUFFIXES: [&str; 5] = ["_guid", "_uuid", "_id", "_url", "_uri"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub uri: String,
    pub rel: String,
}

/// Decorate `rep` in place and return the links it produced, sorted by
/// `(rel, uri)`. Representations outside 200..=206 are left untouched.
pub fn decorate(
    rep: &mut Representation,
    uri: &Uri,
    headers: &HeaderMap,
    default_page_size: usize,
) -> Vec<Link> {
    if !rep.is_success() {
        return Vec::new();
    }

    let path = uri.path();
    let query: Vec<(String, String)> = uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut decorator = Decorator::new(request_origin(uri, headers), path);

    if path != "/" {
        let parent = format!("{}{}", decorator.origin, parent_path(path));
        decorator.push(parent, "collection");
    }

    rep.data = match rep.data.take() {
        Some(Value::Array(items)) => {
            let page_size = if default_page_size == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                default_page_size
            };
            let items = decorator.paginate(items, path, &query, page_size);

            for item in &items {
                match item {
                    Value::String(candidate) if is_link_like(candidate) => {
                        let uri = decorator.resolve(candidate);
                        decorator.push(uri, "item");
                    }
                    Value::Object(object) => decorator.visit(object, path),
                    _ => {}
                }
            }

            Some(Value::Array(items))
        }
        Some(Value::Object(object)) => {
            decorator.visit(&object, &item_collection(path));
            Some(Value::Object(object))
        }
        other => other,
    };

    let links = decorator.finish();

    if let Some(result) = rep.data.take() {
        rep.data = Some(json!({ "link": links, "result": result }));
    }

    links
}

/// Serialize links for the `Link` response header.
pub fn link_header(links: &[Link]) -> Option<String> {
    if links.is_empty() {
        return None;
    }

    Some(
        links
            .iter()
            .map(|link| format!("<{}>; rel=\"{}\"", link.uri, link.rel))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// `scheme://host` of the request; `x-forwarded-proto` overrides the scheme.
pub fn request_origin(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");

    format!("{}://{}", scheme, host)
}

/// Link state for one decoration call.
struct Decorator {
    origin: String,
    root: String,
    seen: HashSet<String>,
    links: Vec<Link>,
}

impl Decorator {
    fn new(origin: String, path: &str) -> Self {
        let root = format!("{}{}", origin, path);
        Self {
            origin,
            root,
            seen: HashSet::new(),
            links: Vec::new(),
        }
    }

    fn push(&mut self, uri: String, rel: &str) {
        if uri == self.root || !self.seen.insert(uri.clone()) {
            return;
        }

        self.links.push(Link {
            uri,
            rel: rel.to_string(),
        });
    }

    /// Slice `items` to the requested page and emit navigation links.
    fn paginate(
        &mut self,
        items: Vec<Value>,
        path: &str,
        query: &[(String, String)],
        default_page_size: usize,
    ) -> Vec<Value> {
        let page = positive_param(query, "page").unwrap_or(1);
        let page_size = positive_param(query, "page_size").unwrap_or(default_page_size);
        let page_count = items.len().div_ceil(page_size);

        if page_count <= 1 {
            if !query.is_empty() {
                self.root = format!("{}{}?{}", self.origin, path, encode_query(query));
            }
            return items;
        }

        let base = format!("{}{}", self.origin, path);
        let page_uri = |n: usize| {
            format!("{}?{}", base, encode_query(&with_page(query, n, page_size)))
        };

        self.root = page_uri(page);

        if page > 1 {
            self.push(page_uri(1), "first");
        }
        if page > 2 && page <= page_count {
            self.push(page_uri(page - 1), "prev");
        }
        if page.saturating_add(1) < page_count {
            self.push(page_uri(page + 1), "next");
        }
        if page != page_count {
            self.push(page_uri(page_count), "last");
        }

        let start = (page - 1).saturating_mul(page_size);
        items.into_iter().skip(start).take(page_size).collect()
    }

    /// Scan an object's keys for relation-bearing values. `collection` is
    /// the path items found at this level belong to.
    fn visit(&mut self, object: &Map<String, Value>, collection: &str) {
        for (key, value) in object {
            match value {
                Value::Null => {}
                Value::Object(child) => {
                    self.visit(child, &format!("/{}", collection_name(key)));
                }
                Value::Array(children) => {
                    let nested = format!("/{}", collection_name(key));
                    for child in children {
                        if let Value::Object(child) = child {
                            self.visit(child, &nested);
                        }
                    }
                }
                scalar => {
                    let Some(text) = scalar_text(scalar) else {
                        continue;
                    };

                    if is_id_key(key) {
                        let uri = self.target(collection, &text);
                        self.push(uri, "item");
                    } else if is_related_key(key) {
                        let uri = self.target(&format!("/{}", collection_name(key)), &text);
                        self.push(uri, "related");
                    }
                }
            }
        }
    }

    fn resolve(&self, value: &str) -> String {
        if has_scheme(value) {
            value.to_string()
        } else {
            format!("{}{}", self.origin, value)
        }
    }

    fn target(&self, collection: &str, value: &str) -> String {
        if is_link_like(value) {
            self.resolve(value)
        } else {
            format!(
                "{}{}/{}",
                self.origin,
                collection.trim_end_matches('/'),
                value
            )
        }
    }

    fn finish(mut self) -> Vec<Link> {
        self.links
            .sort_by(|a, b| a.rel.cmp(&b.rel).then_with(|| a.uri.cmp(&b.uri)));
        self.links
    }
}

/// Path with its trailing slash and final segment removed.
fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
    }
}

/// Collection a top-level object's `id` belongs to: the parent path, or
/// the path itself when it has a single segment.
fn item_collection(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.matches('/').count() > 1 {
        parent_path(path)
    } else if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Collection name derived from a key: drop the relation suffix and any
/// trailing `s`, turn a trailing `y` into `ie`, then append `s`.
pub fn collection_name(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    let base = RELATED_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| &key[..key.len() - suffix.len()])
        .unwrap_or(key);

    let base = base.strip_suffix('s').unwrap_or(base);
    match base.strip_suffix('y') {
        Some(stem) => format!("{}ies", stem),
        None => format!("{}s", base),
    }
}

fn is_id_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("id") || key.eq_ignore_ascii_case("_id")
}

fn is_related_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    RELATED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// `scheme://...` or an absolute path.
fn is_link_like(value: &str) -> bool {
    has_scheme(value) || value.starts_with('/')
}

fn has_scheme(value: &str) -> bool {
    match value.find("://") {
        Some(index) if index > 0 => {
            let scheme = &value[..index];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

/// First value of `name` parsed as an integer >= 1.
fn positive_param(query: &[(String, String)], name: &str) -> Option<usize> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .filter(|value| *value >= 1)
}

fn with_page(query: &[(String, String)], page: usize, page_size: usize) -> Vec<(String, String)> {
    let mut pairs = query.to_vec();
    set_param(&mut pairs, "page", page.to_string());
    set_param(&mut pairs, "page_size", page_size.to_string());
    pairs
}

/// Overwrite the first `key` in place, dropping any repeats, or append it.
fn set_param(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    let mut found = false;
    pairs.retain_mut(|(k, v)| {
        if k.as_str() != key {
            return true;
        }
        if found {
            return false;
        }
        found = true;
        *v = value.clone();
        true
    });

    if !found {
        pairs.push((key.to_string(), value));
    }
}

fn encode_query(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
