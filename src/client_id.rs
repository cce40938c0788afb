//! Rate-limiter partition keys.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const DEFAULT_SESSION_COOKIE: &str = "tenso.sid";

/// Resolves the client id for a request: the session id when the session
/// has been verified, otherwise its network address. An unverified cookie
/// is ignored so a client cannot mint fresh rate windows with it.
#[derive(Debug, Clone)]
pub struct ClientIdResolver {
    session_cookie: String,
}

impl ClientIdResolver {
    pub fn new(session_cookie: impl Into<String>) -> Self {
        Self {
            session_cookie: session_cookie.into(),
        }
    }

    pub fn resolve(&self, parts: &Parts, session_verified: bool) -> String {
        if session_verified {
            if let Some(session) = cookie_value(&parts.headers, &self.session_cookie) {
                if !session.is_empty() {
                    return format!("session:{}", session);
                }
            }
        }

        client_ip(parts)
    }
}

impl Default for ClientIdResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE)
    }
}

/// Network address of the caller, honoring proxy headers first.
pub fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = header_str(&parts.headers, "x-forwarded-for") {
        if let Some(first_ip) = forwarded.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return first_ip.to_string();
            }
        }
    }

    if let Some(real_ip) = header_str(&parts.headers, "x-real-ip") {
        return real_ip.trim().to_string();
    }

    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Value of the named cookie across every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
