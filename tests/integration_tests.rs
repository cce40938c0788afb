use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{request::Parts, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tenso::{create_app, ApiConfig, Handler, Reply, RequestContext, Tenso};
use tower::ServiceExt;

fn users() -> Value {
    Value::Array((1..=5).map(|id| json!({"id": id, "name": format!("user {}", id)})).collect())
}

fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "api.test")
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn counting_handler(calls: Arc<AtomicUsize>, value: Value) -> Handler {
    Handler::dynamic(move |_ctx: RequestContext| {
        let calls = calls.clone();
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::ok(value))
        }
    })
}

fn app(tenso: Tenso) -> Router {
    create_app(Arc::new(tenso))
}

#[tokio::test]
async fn test_paginated_collection_scenario() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 10;
    let app = app(Tenso::builder(config).get("/users", Handler::Static(users())).build().unwrap());

    let warmup = app.clone().oneshot(get("/users", "10.0.0.1")).await.unwrap();
    assert_eq!(warmup.headers()["x-ratelimit-remaining"], "9");

    let response = app
        .oneshot(get("/users?page=2&page_size=2", "10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "8");
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    assert_eq!(
        response.headers()["link"],
        "<http://api.test/>; rel=\"collection\", \
         <http://api.test/users?page=1&page_size=2>; rel=\"first\", \
         <http://api.test/users/3>; rel=\"item\", \
         <http://api.test/users/4>; rel=\"item\", \
         <http://api.test/users?page=3&page_size=2>; rel=\"last\""
    );

    let body = body_json(response).await;
    let result = body["data"]["result"].as_array().unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0]["id"], 3);
    assert_eq!(result[1]["id"], 4);
    assert_eq!(body["error"], Value::Null);
    assert_eq!(body["status"], 200);
}

#[tokio::test]
async fn test_concurrent_requests_from_one_client_share_the_last_slot() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 1;
    config.rate.reset = std::time::Duration::from_secs(60);
    let app = app(Tenso::builder(config).get("/ping", Handler::Static(json!("pong"))).build().unwrap());

    let (a, b) = tokio::join!(
        app.clone().oneshot(get("/ping", "10.0.0.2")),
        app.clone().oneshot(get("/ping", "10.0.0.2")),
    );
    let mut statuses = vec![a.unwrap(), b.unwrap()];
    statuses.sort_by_key(|response| response.status());

    assert_eq!(statuses[0].status(), StatusCode::OK);
    assert_eq!(statuses[1].status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(statuses[1].headers()["retry-after"], "60");

    let rejected = statuses.pop().unwrap();
    let body = body_json(rejected).await;
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(body["data"], Value::Null);
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 1;
    let app = app(Tenso::builder(config).get("/ping", Handler::Static(json!("pong"))).build().unwrap());

    let first = app.clone().oneshot(get("/ping", "10.0.0.3")).await.unwrap();
    let second = app.clone().oneshot(get("/ping", "10.0.0.4")).await.unwrap();
    let repeat = app.oneshot(get("/ping", "10.0.0.3")).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rotating_session_cookie_cannot_reset_the_window() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 1;
    let app = app(Tenso::builder(config).get("/ping", Handler::Static(json!("pong"))).build().unwrap());

    let mut admitted = 0;
    for sid in 0..5 {
        let mut request = get("/ping", "10.0.0.9");
        request
            .headers_mut()
            .insert("cookie", format!("tenso.sid=s{}", sid).parse().unwrap());
        if app.clone().oneshot(request).await.unwrap().status() == StatusCode::OK {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_verified_sessions_get_their_own_window() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 1;
    let tenso = Tenso::builder(config)
        .get("/ping", Handler::Static(json!("pong")))
        .authenticator(|parts: &Parts| parts.headers.contains_key("authorization"))
        .build()
        .unwrap();
    let app = app(tenso);

    let session = |sid: &str| {
        let mut request = get("/ping", "10.0.0.10");
        request
            .headers_mut()
            .insert("cookie", format!("tenso.sid={}", sid).parse().unwrap());
        request
            .headers_mut()
            .insert("authorization", "Bearer ok".parse().unwrap());
        request
    };

    assert_eq!(app.clone().oneshot(session("alice")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.clone().oneshot(session("bob")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        app.oneshot(session("alice")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_protected_path_redirects_without_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = ApiConfig::default();
    config.auth.protect = vec!["/admin".to_string()];

    let tenso = Tenso::builder(config)
        .get("/admin", counting_handler(calls.clone(), json!({"secret": true})))
        .authenticator(|parts: &Parts| parts.headers.contains_key("authorization"))
        .build()
        .unwrap();
    let app = app(tenso);

    let response = app.clone().oneshot(get("/admin", "10.0.0.5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/login");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let mut authorized = get("/admin", "10.0.0.5");
    authorized
        .headers_mut()
        .insert("authorization", "Bearer ok".parse().unwrap());
    let response = app.oneshot(authorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_protected_path_without_redirect_is_unauthorized() {
    let mut config = ApiConfig::default();
    config.auth.protect = vec!["/admin".to_string()];
    config.auth.redirect = None;
    let app = app(Tenso::builder(config).build().unwrap());

    let response = app.oneshot(get("/admin/users", "10.0.0.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Unauthorized");
}

#[tokio::test]
async fn test_exact_route_beats_earlier_pattern() {
    let tenso = Tenso::builder(ApiConfig::default())
        .get("/users/:id", Handler::Static(json!({"kind": "pattern"})))
        .get("/users/me", Handler::Static(json!({"kind": "exact"})))
        .build()
        .unwrap();
    let app = app(tenso);

    let me = body_json(app.clone().oneshot(get("/users/me", "c")).await.unwrap()).await;
    assert_eq!(me["data"]["result"]["kind"], "exact");

    let other = body_json(app.oneshot(get("/users/42", "c")).await.unwrap()).await;
    assert_eq!(other["data"]["result"]["kind"], "pattern");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = app(Tenso::builder(ApiConfig::default()).build().unwrap());

    let response = app.oneshot(get("/nowhere", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get("link").is_none());

    let body = body_json(response).await;
    assert_eq!(body, json!({"data": null, "error": "Not Found", "status": 404}));
}

#[tokio::test]
async fn test_accept_header_selects_renderer() {
    let app = app(Tenso::builder(ApiConfig::default()).get("/users", Handler::Static(users())).build().unwrap());

    let mut request = get("/users", "c");
    request
        .headers_mut()
        .insert("accept", "application/jsonl".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["content-type"], "application/jsonl");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(text.lines().count(), 5);
    assert!(text.starts_with(r#"{"id":1,"name":"user 1"}"#));
}

#[tokio::test]
async fn test_handler_failure_is_composed_and_hardened() {
    let mut config = ApiConfig::default();
    config.hardened = true;
    let tenso = Tenso::builder(config)
        .get(
            "/fail",
            Handler::dynamic(|_ctx| async { Err(anyhow::anyhow!("disk full").into()) }),
        )
        .build()
        .unwrap();

    let response = app(tenso).oneshot(get("/fail", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(body_json(response).await["error"], "Internal Server Error");
}

#[tokio::test]
async fn test_handler_panic_becomes_server_error() {
    let tenso = Tenso::builder(ApiConfig::default())
        .get(
            "/panic",
            Handler::dynamic(|ctx: RequestContext| async move {
                if ctx.path() == "/panic" {
                    panic!("handler bug");
                }
                Ok(Reply::ok(Value::Null))
            }),
        )
        .build()
        .unwrap();

    let app = app(tenso);

    let response = app.clone().oneshot(get("/panic", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("handler bug"));
    assert_eq!(body["status"], 500);

    let response = app.oneshot(get("/panic?format=plain", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("handler bug"));
}

#[tokio::test]
async fn test_hardened_handler_panic_hides_detail() {
    let mut config = ApiConfig::default();
    config.hardened = true;
    let tenso = Tenso::builder(config)
        .get(
            "/panic",
            Handler::dynamic(|ctx: RequestContext| async move {
                if ctx.path() == "/panic" {
                    panic!("secret detail");
                }
                Ok(Reply::ok(Value::Null))
            }),
        )
        .build()
        .unwrap();

    let response = app(tenso).oneshot(get("/panic", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "Internal Server Error");
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = app(Tenso::builder(ApiConfig::default()).build().unwrap());

    let response = app.oneshot(get("/", "c")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_unprotected_path_skips_rate_limit() {
    let mut config = ApiConfig::default();
    config.rate.enabled = true;
    config.rate.limit = 1;
    config.auth.unprotect = vec!["/health".to_string()];
    let app = app(Tenso::builder(config).get("/health", Handler::Static(json!("ok"))).build().unwrap());

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/health", "10.0.0.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
}
