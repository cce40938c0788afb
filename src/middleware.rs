use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use crate::client_id::client_ip;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let request_id = parts
        .headers
        .get(&X_REQUEST_ID)
        .cloned()
        .unwrap_or_else(new_request_id);
    parts.headers.insert(X_REQUEST_ID, request_id.clone());

    let method = parts.method.clone();
    let uri = parts.uri.clone();
    let client_ip = client_ip(&parts);
    let id = request_id.to_str().unwrap_or("-").to_string();

    info!(
        target: "tenso::middleware",
        request_id = %id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(Request::from_parts(parts, body)).await;

    let status = response.status();
    info!(
        target: "tenso::middleware",
        request_id = %id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response.headers_mut().insert(X_REQUEST_ID, request_id);
    response
}

fn new_request_id() -> HeaderValue {
    // A hyphenated uuid is always a valid header value.
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}
