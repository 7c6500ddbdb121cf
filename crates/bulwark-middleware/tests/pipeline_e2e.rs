//! End-to-end pipeline integration tests.
//!
//! These tests build pipelines the way the gateway does, through
//! `build_pipeline`, and check that the stages cooperate in order:
//!
//! 1. CORS
//! 2. Gzip
//! 3. Session
//! 4. Trusted host
//! 5. Error handling
//! 6. Rate limit
//! 7. Timeout

use bulwark_limiter::{Limits, RateLimiter};
use bulwark_middleware::{
    build_pipeline, BoxFuture, MiddlewareConfig, MiddlewareContext, MiddlewareError,
    MiddlewareResult, MiddlewareSettings, Pipeline, Request, Response, ResponseExt, Session,
};
use bytes::Bytes;
use http::{header, Method, Request as HttpRequest, StatusCode};
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

fn make_request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = HttpRequest::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

fn get(path: &str) -> Request {
    make_request(Method::GET, path, &[])
}

fn ctx_from(ip: &str) -> MiddlewareContext {
    MiddlewareContext::new().with_client_ip(ip.parse::<IpAddr>().unwrap())
}

fn ok_handler(
    _ctx: &mut MiddlewareContext,
    _req: Request,
) -> BoxFuture<'static, MiddlewareResult> {
    Box::pin(async { Ok(Response::text(StatusCode::OK, "OK")) })
}

fn failing_handler(
    _ctx: &mut MiddlewareContext,
    _req: Request,
) -> BoxFuture<'static, MiddlewareResult> {
    Box::pin(async { Err(MiddlewareError::handler("upstream unavailable")) })
}

fn pipeline_with(flags: &[(&str, bool)], limiter: Arc<RateLimiter>) -> Pipeline {
    build_pipeline(
        &MiddlewareConfig::from_flags(flags.iter().copied()),
        &MiddlewareSettings::default(),
        limiter,
    )
}

async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_default_stage_order() {
    let pipeline = pipeline_with(&[], Arc::new(RateLimiter::default()));
    assert_eq!(
        pipeline.stage_names(),
        vec!["cors", "gzip", "session", "trusted_host", "error_handling", "timeout"]
    );
}

#[test]
fn test_rate_limit_inserted_before_timeout() {
    let pipeline = pipeline_with(&[("rate_limit", true)], Arc::new(RateLimiter::default()));
    assert_eq!(
        pipeline.stage_names(),
        vec![
            "cors",
            "gzip",
            "session",
            "trusted_host",
            "error_handling",
            "rate_limit",
            "timeout"
        ]
    );
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_second_request_over_minute_budget_gets_429() {
    let limiter = Arc::new(RateLimiter::new(Limits::new(1, 100, 100)));
    let pipeline = pipeline_with(&[("rate_limit", true)], Arc::clone(&limiter));

    let mut ctx = ctx_from("198.51.100.1");
    let first = pipeline.process(&mut ctx, get("/"), ok_handler).await;
    assert_eq!(first.status(), StatusCode::OK);

    let mut ctx = ctx_from("198.51.100.1");
    let second = pipeline.process(&mut ctx, get("/"), ok_handler).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(ctx.short_circuited_by(), Some("rate_limit"));
    assert_eq!(
        body_json(second).await,
        serde_json::json!({"error": "Too many requests"})
    );
    assert_eq!(limiter.snapshot().usage.requests_this_minute, 1);
}

#[tokio::test]
async fn test_blacklisted_client_gets_403() {
    let limiter = Arc::new(
        RateLimiter::builder()
            .blacklist(["203.0.113.9"])
            .build(),
    );
    let pipeline = pipeline_with(&[("rate_limit", true)], limiter);

    let mut ctx = ctx_from("203.0.113.9");
    let response = pipeline.process(&mut ctx, get("/"), ok_handler).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"error": "IP address is not allowed"})
    );

    let mut ctx = ctx_from("198.51.100.1");
    let response = pipeline.process(&mut ctx, get("/"), ok_handler).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_disabled_never_counts() {
    let limiter = Arc::new(RateLimiter::new(Limits::new(1, 1, 1)));
    let pipeline = pipeline_with(&[], Arc::clone(&limiter));

    for _ in 0..3 {
        let mut ctx = ctx_from("198.51.100.1");
        let response = pipeline.process(&mut ctx, get("/"), ok_handler).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(limiter.snapshot().usage.requests_this_minute, 0);
}

// =============================================================================
// Faults
// =============================================================================

#[tokio::test]
async fn test_handler_error_caught_by_error_handling() {
    let pipeline = pipeline_with(&[], Arc::new(RateLimiter::default()));
    let mut ctx = MiddlewareContext::new();

    let response = pipeline.process(&mut ctx, get("/"), failing_handler).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"error": "upstream unavailable"})
    );
}

#[tokio::test]
async fn test_handler_error_without_error_handling_hits_fallback() {
    let pipeline = pipeline_with(&[("error_handling", false)], Arc::new(RateLimiter::default()));
    let mut ctx = MiddlewareContext::new();

    let response = pipeline.process(&mut ctx, get("/"), failing_handler).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        serde_json::json!({"message": "An internal server error occurred."})
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_gets_504() {
    let pipeline = pipeline_with(&[], Arc::new(RateLimiter::default()));
    let mut ctx = MiddlewareContext::new();

    let response = pipeline
        .process(&mut ctx, get("/"), |_ctx, _req| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Response::text(StatusCode::OK, "late"))
            })
        })
        .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(ctx.short_circuited_by(), Some("timeout"));
    assert_eq!(body_bytes(response).await, "Request timed out");
}

// =============================================================================
// Outer stages
// =============================================================================

#[tokio::test]
async fn test_cors_preflight_never_reaches_handler() {
    let pipeline = pipeline_with(&[("rate_limit", true)], Arc::new(RateLimiter::default()));
    let mut ctx = MiddlewareContext::new();

    let request = make_request(
        Method::OPTIONS,
        "/v1/chat",
        &[
            ("origin", "https://app.example.com"),
            ("access-control-request-method", "POST"),
        ],
    );
    let response = pipeline.process(&mut ctx, request, failing_handler).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.short_circuited_by(), Some("cors"));
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn test_large_response_is_gzipped() {
    let pipeline = pipeline_with(&[], Arc::new(RateLimiter::default()));
    let mut ctx = MiddlewareContext::new();
    let body = "x".repeat(4096);
    let expected = body.clone();

    let request = make_request(Method::GET, "/", &[("accept-encoding", "gzip, deflate")]);
    let response = pipeline
        .process(&mut ctx, request, move |_ctx, _req| {
            Box::pin(async move { Ok(Response::text(StatusCode::OK, &body)) })
        })
        .await;

    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    let compressed = body_bytes(response).await;
    assert!(compressed.len() < expected.len());
}

#[tokio::test]
async fn test_session_cookie_round_trip() {
    let pipeline = pipeline_with(&[], Arc::new(RateLimiter::default()));

    let mut ctx = MiddlewareContext::new();
    let response = pipeline
        .process(&mut ctx, get("/login"), |ctx, _req| {
            if let Some(session) = ctx.get_extension_mut::<Session>() {
                session.insert("user", "alice");
            }
            Box::pin(async { Ok(Response::text(StatusCode::OK, "OK")) })
        })
        .await;
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let mut ctx = MiddlewareContext::new();
    let response = pipeline
        .process(
            &mut ctx,
            make_request(Method::GET, "/me", &[("cookie", cookie.as_str())]),
            |ctx, _req| {
                let user = ctx
                    .get_extension::<Session>()
                    .and_then(|s| s.get("user"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("anonymous")
                    .to_string();
                Box::pin(async move { Ok(Response::text(StatusCode::OK, &user)) })
            },
        )
        .await;
    assert_eq!(body_bytes(response).await, "alice");
}

#[tokio::test]
async fn test_untrusted_host_rejected_before_rate_limit() {
    let limiter = Arc::new(RateLimiter::default());
    let mut settings = MiddlewareSettings::default();
    settings.trusted_host.allowed_hosts = vec!["api.example.com".to_string()];
    let pipeline = build_pipeline(
        &MiddlewareConfig::from_flags([("rate_limit", true)]),
        &settings,
        Arc::clone(&limiter),
    );

    let mut ctx = ctx_from("198.51.100.1");
    let request = make_request(Method::GET, "/", &[("host", "evil.example")]);
    let response = pipeline.process(&mut ctx, request, ok_handler).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_bytes(response).await, "Invalid host header");
    assert_eq!(limiter.snapshot().usage.requests_this_minute, 0);
}
