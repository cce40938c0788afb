//! Configuration.
//!
//! `Config` holds the process settings read from the environment. `ApiConfig`
//! is the JSON document describing routes, rate limits, auth and renderers.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

use crate::client_id::DEFAULT_SESSION_COOKIE;
use crate::error::{Result, TensoError};
use crate::hypermedia::DEFAULT_PAGE_SIZE;
use crate::renderers::{JAVASCRIPT, JSON, JSONL, PLAIN};

/// Process settings read from the environment.
#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:8000")]
    pub bind_addr: SocketAddr,

    /// Log level for the tenso target
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Path to a JSON API configuration file
    #[envconfig(from = "TENSO_CONFIG")]
    pub api_config_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }
}

/// Everything the request pipeline is configured with.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApiConfig {
    #[validate(nested)]
    pub rate: RateConfig,

    pub auth: AuthConfig,

    /// Default page size for collection pagination
    #[validate(range(min = 1))]
    pub page_size: usize,

    /// Enabled renderer names, in selection order
    #[validate(length(min = 1))]
    pub renderers: Vec<String>,

    #[validate(nested)]
    pub security: SecurityConfig,

    /// Cookie carrying the session id used as the rate-limit key
    #[validate(length(min = 1))]
    pub session_cookie: String,

    /// Hide handler failure detail from clients
    pub hardened: bool,

    #[validate(range(min = 1))]
    pub max_body_bytes: usize,

    /// Static route values: lowercased method -> path pattern -> value
    pub routes: HashMap<String, Map<String, Value>>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate: RateConfig::default(),
            auth: AuthConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            renderers: vec![
                JSONL.to_string(),
                JAVASCRIPT.to_string(),
                PLAIN.to_string(),
                JSON.to_string(),
            ],
            security: SecurityConfig::default(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            hardened: false,
            max_body_bytes: 1024 * 1024,
            routes: HashMap::new(),
        }
    }
}

impl ApiConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TensoError::Configuration(format!("invalid API configuration: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TensoError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateConfig {
    pub enabled: bool,

    /// Requests allowed per window
    #[validate(range(min = 1))]
    pub limit: u64,

    /// Window length
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_window"))]
    pub reset: Duration,

    /// Status sent when a client is over its limit
    #[validate(range(min = 400, max = 599))]
    pub status: u16,

    pub message: String,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 450,
            reset: Duration::from_secs(900),
            status: 429,
            message: "Too many requests".to_string(),
        }
    }
}

impl RateConfig {
    pub fn window_seconds(&self) -> u64 {
        self.reset.as_secs()
    }
}

fn validate_window(reset: &Duration) -> std::result::Result<(), ValidationError> {
    if reset.as_secs() == 0 || reset.subsec_nanos() != 0 {
        return Err(ValidationError::new("window_whole_seconds"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths requiring authentication; first match wins
    pub protect: Vec<String>,

    /// Paths skipping authentication and rate limiting
    pub unprotect: Vec<String>,

    /// Login redirect target; `None` answers 401 instead
    pub redirect: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            protect: Vec::new(),
            unprotect: Vec::new(),
            redirect: Some("/login".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecurityConfig {
    /// Header and cookie name carrying the anti-forgery token
    #[validate(length(min = 1))]
    pub key: String,

    /// Require the token on unsafe methods to protected paths
    pub csrf: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key: "x-csrf-token".to_string(),
            csrf: false,
        }
    }
}
