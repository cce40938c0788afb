use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Message sent in place of handler failure detail when running hardened.
pub const GENERIC_FAILURE: &str = "Internal Server Error";

#[derive(Debug, Clone, Error)]
pub enum TensoError {
    #[error("Not Found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Payload Too Large")]
    PayloadTooLarge,

    #[error("{message}")]
    RateLimited {
        status: u16,
        message: String,
        retry_after: u64,
    },

    /// Contract violation inside the crate; never expected from a client.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Handler(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TensoError {
    pub fn handler(message: impl Into<String>) -> Self {
        TensoError::Handler(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TensoError::NotFound => StatusCode::NOT_FOUND,
            TensoError::Unauthorized => StatusCode::UNAUTHORIZED,
            TensoError::Forbidden => StatusCode::FORBIDDEN,
            TensoError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            TensoError::RateLimited { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::TOO_MANY_REQUESTS)
            }
            TensoError::Validation(_)
            | TensoError::Handler(_)
            | TensoError::Configuration(_)
            | TensoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Expected outcomes are answered, not logged as faults.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self,
            TensoError::NotFound
                | TensoError::Unauthorized
                | TensoError::Forbidden
                | TensoError::PayloadTooLarge
                | TensoError::RateLimited { .. }
        )
    }

    /// The message a client is allowed to see.
    pub fn public_message(&self, hardened: bool) -> String {
        if hardened && self.is_fault() {
            GENERIC_FAILURE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<anyhow::Error> for TensoError {
    fn from(err: anyhow::Error) -> Self {
        TensoError::Handler(err.to_string())
    }
}

impl From<serde_json::Error> for TensoError {
    fn from(err: serde_json::Error) -> Self {
        TensoError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TensoError>;

/// Body used when nothing else can be rendered.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub data: Option<()>,
    pub error: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, status: u16) -> Self {
        Self {
            data: None,
            error: error.to_string(),
            status,
        }
    }

    pub fn from_tenso_error(err: &TensoError, hardened: bool) -> Self {
        Self::new(&err.public_message(hardened), err.status().as_u16())
    }
}
