//! The `Representation` envelope every response body is rendered from.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TensoError};

/// Uniform response envelope handed to the decorator and the renderers.
///
/// `data` and `error` are never both set; both are empty only for
/// redirects and bodiless statuses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Representation {
    pub data: Option<Value>,
    pub error: Option<String>,
    pub status: u16,
}

/// Normalize a handler outcome into a `Representation`.
///
/// An error always clears `data`, and must come with an explicit status.
/// `value` is deep-copied so later decoration never aliases the caller's
/// value.
pub fn compose(
    value: Option<&Value>,
    error: Option<&str>,
    status: Option<StatusCode>,
) -> Result<Representation> {
    match error {
        Some(error) => {
            let status = status.ok_or_else(|| {
                TensoError::Validation(format!(
                    "status is required when composing error '{}'",
                    error
                ))
            })?;

            Ok(Representation {
                data: None,
                error: Some(error.to_string()),
                status: status.as_u16(),
            })
        }
        None => Ok(Representation {
            data: value.filter(|v| !v.is_null()).cloned(),
            error: None,
            status: status.unwrap_or(StatusCode::OK).as_u16(),
        }),
    }
}

impl Representation {
    pub fn from_error(err: &TensoError, hardened: bool) -> Self {
        Self {
            data: None,
            error: Some(err.public_message(hardened)),
            status: err.status().as_u16(),
        }
    }

    pub fn redirect(status: StatusCode) -> Self {
        Self {
            data: None,
            error: None,
            status: status.as_u16(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Statuses eligible for hypermedia decoration.
    pub fn is_success(&self) -> bool {
        (200..=206).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_defaults_to_ok() {
        let value = json!({"id": 1});
        let rep = compose(Some(&value), None, None).unwrap();

        assert_eq!(rep.data, Some(value));
        assert_eq!(rep.error, None);
        assert_eq!(rep.status, 200);
    }

    #[test]
    fn test_error_clears_data() {
        let value = json!([1, 2, 3]);
        let rep = compose(Some(&value), Some("nope"), Some(StatusCode::BAD_REQUEST)).unwrap();

        assert_eq!(rep.data, None);
        assert_eq!(rep.error.as_deref(), Some("nope"));
        assert_eq!(rep.status, 400);
    }

    #[test]
    fn test_error_without_status_fails_fast() {
        let err = compose(None, Some("nope"), None).unwrap_err();
        assert!(matches!(err, TensoError::Validation(_)));
    }

    #[test]
    fn test_value_is_deep_copied() {
        let mut value = json!({"name": "ada"});
        let rep = compose(Some(&value), None, None).unwrap();

        value["name"] = json!("grace");
        assert_eq!(rep.data.unwrap()["name"], "ada");
    }

    #[test]
    fn test_data_and_error_exclusive() {
        let value = json!("x");
        let cases = [
            compose(Some(&value), None, None).unwrap(),
            compose(Some(&value), Some("e"), Some(StatusCode::CONFLICT)).unwrap(),
            compose(None, None, Some(StatusCode::NO_CONTENT)).unwrap(),
            Representation::from_error(&TensoError::NotFound, false),
        ];

        for rep in cases {
            assert!(!(rep.data.is_some() && rep.error.is_some()));
        }
    }

    #[test]
    fn test_redirect_carries_neither() {
        let rep = Representation::redirect(StatusCode::FOUND);
        assert_eq!(rep.status_code(), StatusCode::FOUND);
        assert!(rep.data.is_none() && rep.error.is_none());
        assert!(!rep.is_success());
    }

    #[test]
    fn test_success_range() {
        let value = json!(1);
        assert!(compose(Some(&value), None, Some(StatusCode::PARTIAL_CONTENT))
            .unwrap()
            .is_success());
        assert!(!compose(Some(&value), None, Some(StatusCode::IM_USED))
            .unwrap()
            .is_success());
    }
}
