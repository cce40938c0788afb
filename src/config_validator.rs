use axum::http::{HeaderName, Method};
use validator::Validate;

use crate::config::ApiConfig;
use crate::error::{Result, TensoError};
use crate::gate::compile_path_patterns;
use crate::renderers::RendererRegistry;
use crate::router::compile_pattern;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a complete API configuration against the renderers
    /// available at startup
    pub fn validate_api_config(config: &ApiConfig, registry: &RendererRegistry) -> Result<()> {
        config
            .validate()
            .map_err(|e| TensoError::Configuration(format!("invalid API configuration: {}", e)))?;

        compile_path_patterns(&config.auth.protect)?;
        compile_path_patterns(&config.auth.unprotect)?;

        if let Some(redirect) = &config.auth.redirect {
            Self::validate_redirect(redirect)?;
        }

        Self::validate_renderers(&config.renderers, registry)?;
        Self::validate_security_key(&config.security.key)?;

        for (method, routes) in &config.routes {
            Self::validate_method(method)?;
            for pattern in routes.keys() {
                compile_pattern(pattern)?;
            }
        }

        Ok(())
    }

    /// Validates a login redirect target
    pub fn validate_redirect(redirect: &str) -> Result<()> {
        if redirect.starts_with('/') || url::Url::parse(redirect).is_ok() {
            return Ok(());
        }

        Err(TensoError::Configuration(format!(
            "redirect '{}' must be an absolute path or URL",
            redirect
        )))
    }

    /// Validates that every enabled renderer is registered
    pub fn validate_renderers(enabled: &[String], registry: &RendererRegistry) -> Result<()> {
        match enabled.iter().find(|name| !registry.contains(name)) {
            Some(missing) => Err(TensoError::Configuration(format!(
                "renderer '{}' is enabled but not registered; available: {:?}",
                missing,
                registry.names()
            ))),
            None => Ok(()),
        }
    }

    /// Validates a route method name
    pub fn validate_method(method: &str) -> Result<()> {
        if method.is_empty() || Method::from_bytes(method.to_uppercase().as_bytes()).is_err() {
            return Err(TensoError::Configuration(format!(
                "invalid route method '{}'",
                method
            )));
        }

        Ok(())
    }

    /// Validates the anti-forgery header name
    pub fn validate_security_key(key: &str) -> Result<()> {
        HeaderName::from_bytes(key.to_lowercase().as_bytes())
            .map(|_| ())
            .map_err(|_| {
                TensoError::Configuration(format!("security key '{}' is not a valid header name", key))
            })
    }
}
