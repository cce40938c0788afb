//! Admission gate.
//!
//! Runs once per request, before dispatch:
//! 1. `unprotect` match: admit immediately, no rate or auth checks
//! 2. `protect` match decides whether authentication is required
//! 3. rate check, stamping the `x-ratelimit-*` headers
//! 4. auth check against the `Authenticator`, redirecting to login (or 401)
//! 5. anti-forgery token check for unsafe methods on protected paths
//!
//! Any step may end the request; none of them is ever undone.

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::client_id::cookie_value;
use crate::config::ApiConfig;
use crate::error::{Result, TensoError};
use crate::rate_limiter::RateLimiter;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const RETRY_AFTER: &str = "retry-after";

/// Answers whether a request already carries a valid identity.
pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self, request: &Parts) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(&Parts) -> bool + Send + Sync,
{
    fn is_authenticated(&self, request: &Parts) -> bool {
        self(request)
    }
}

/// Treats every request as unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn is_authenticated(&self, _request: &Parts) -> bool {
        false
    }
}

/// Per-request authentication requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub protect: bool,
    /// Reserved for handlers that authenticate later; always false here.
    pub protect_async: bool,
    pub unprotect: bool,
}

/// The request may be dispatched.
#[derive(Debug)]
pub struct Admission {
    pub auth: AuthContext,
    pub headers: HeaderMap,
}

/// The request ends at the gate.
#[derive(Debug)]
pub enum Terminal {
    Redirect { location: String, headers: HeaderMap },
    Reject { error: TensoError, headers: HeaderMap },
}

pub struct AdmissionGate {
    protect: Vec<Regex>,
    unprotect: Vec<Regex>,
    redirect: Option<String>,
    limiter: Option<RateLimiter>,
    rate_status: u16,
    rate_message: String,
    csrf_key: Option<String>,
    authenticator: Arc<dyn Authenticator>,
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("protect", &self.protect)
            .field("unprotect", &self.unprotect)
            .field("redirect", &self.redirect)
            .field("limiter", &self.limiter)
            .field("csrf_key", &self.csrf_key)
            .finish_non_exhaustive()
    }
}

impl AdmissionGate {
    /// `limiter` is `None` when rate limiting is disabled.
    pub fn new(
        config: &ApiConfig,
        limiter: Option<RateLimiter>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        Ok(Self {
            protect: compile_path_patterns(&config.auth.protect)?,
            unprotect: compile_path_patterns(&config.auth.unprotect)?,
            redirect: config.auth.redirect.clone(),
            limiter,
            rate_status: config.rate.status,
            rate_message: config.rate.message.clone(),
            csrf_key: config
                .security
                .csrf
                .then(|| config.security.key.to_lowercase()),
            authenticator,
        })
    }

    /// Whether the authenticator vouches for this request.
    pub fn is_authenticated(&self, request: &Parts) -> bool {
        self.authenticator.is_authenticated(request)
    }

    /// Which authentication rules apply to `path`.
    pub fn classify(&self, path: &str) -> AuthContext {
        if self.unprotect.iter().any(|pattern| pattern.is_match(path)) {
            return AuthContext {
                unprotect: true,
                ..AuthContext::default()
            };
        }

        let is_login = self.redirect.as_deref() == Some(path);

        AuthContext {
            protect: !is_login && self.protect.iter().any(|pattern| pattern.is_match(path)),
            protect_async: false,
            unprotect: false,
        }
    }

    pub fn admit(&self, request: &Parts, client_id: &str) -> std::result::Result<Admission, Terminal> {
        let auth = self.classify(request.uri.path());
        let mut headers = HeaderMap::new();

        if auth.unprotect {
            debug!(path = %request.uri.path(), "unprotected path, skipping admission checks");
            return Ok(Admission { auth, headers });
        }

        if let Err(error) = self.check_rate(request, client_id, &mut headers) {
            return Err(Terminal::Reject { error, headers });
        }

        if auth.protect && !self.is_authenticated(request) {
            debug!(path = %request.uri.path(), client_id = %client_id, "unauthenticated request to protected path");
            return Err(match &self.redirect {
                Some(location) => Terminal::Redirect {
                    location: location.clone(),
                    headers,
                },
                None => Terminal::Reject {
                    error: TensoError::Unauthorized,
                    headers,
                },
            });
        }

        if let Err(error) = self.check_csrf(request, auth) {
            return Err(Terminal::Reject { error, headers });
        }

        Ok(Admission { auth, headers })
    }

    fn check_rate(&self, request: &Parts, client_id: &str, headers: &mut HeaderMap) -> Result<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        let decision = limiter.check(client_id, request)?;

        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));

        if decision.allowed {
            return Ok(());
        }

        debug!(client_id = %client_id, reset_at = decision.reset_at, "rate limit exceeded");
        headers.insert(RETRY_AFTER, HeaderValue::from(decision.window_seconds));

        Err(TensoError::RateLimited {
            status: self.rate_status,
            message: self.rate_message.clone(),
            retry_after: decision.window_seconds,
        })
    }

    /// Double-submit check: header and cookie named by the security key
    /// must be present and equal.
    fn check_csrf(&self, request: &Parts, auth: AuthContext) -> Result<()> {
        let Some(key) = &self.csrf_key else {
            return Ok(());
        };

        if !auth.protect || is_safe_method(&request.method) {
            return Ok(());
        }

        let header = request
            .headers
            .get(key.as_str())
            .and_then(|value| value.to_str().ok());
        let cookie = cookie_value(&request.headers, key);

        match (header, cookie) {
            (Some(header), Some(cookie)) if !header.is_empty() && header == cookie => Ok(()),
            _ => Err(TensoError::Forbidden),
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Compile a protect/unprotect entry. Entries match a path prefix ending on
/// a segment boundary; `*` matches anything.
pub fn compile_path_pattern(pattern: &str) -> Result<Regex> {
    let normalized = pattern.replace(".*", "*").replace('*', ".*");

    RegexBuilder::new(&format!("^{}(/|$)", normalized.trim_end_matches('/')))
        .case_insensitive(true)
        .build()
        .map_err(|e| TensoError::Configuration(format!("invalid auth pattern '{}': {}", pattern, e)))
}

pub fn compile_path_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_path_pattern(p)).collect()
}
