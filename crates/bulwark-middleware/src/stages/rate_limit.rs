//! Rate limiting middleware.
//!
//! Consults the shared [`RateLimiter`] for every request:
//!
//! 1. A blacklisted client gets `403 {"error": "IP address is not allowed"}`.
//! 2. A request over budget gets `429 {"error": "Too many requests"}`.
//! 3. Anything else continues down the chain.
//!
//! The budget is charged [`MiddlewareContext::tokens`] tokens, which is 1
//! unless the caller set something else.
//!
//! ## Client address
//!
//! The peer address from the context is used by default. With
//! `trust_forwarded_for`, the first address in `X-Forwarded-For` wins
//! instead. Without either, the client is keyed as `"unknown"`.
//!
//! ## Blacklist only
//!
//! Built with `blacklist_only(true)` the stage refuses blacklisted clients
//! and passes everything else through without charging the budget.

use crate::config::RateLimitSettings;
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use bulwark_limiter::{Admission, RateLimiter};
use bulwark_telemetry::metrics::{record_admission, OUTCOME_ADMITTED, OUTCOME_BLOCKED_IP};
use http::StatusCode;
use std::sync::Arc;

/// Body message for blacklisted clients.
pub const IP_NOT_ALLOWED_MESSAGE: &str = "IP address is not allowed";

/// Body message for requests over budget.
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests";

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting middleware.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
    blacklist_only: bool,
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug, Clone)]
pub struct RateLimitBuilder {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
    blacklist_only: bool,
}

impl RateLimitBuilder {
    /// Starts a builder around a shared limiter.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trust_forwarded_for: false,
            blacklist_only: false,
        }
    }

    /// Key clients by `X-Forwarded-For` instead of the peer address.
    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Only enforce the blacklist; never count requests.
    #[must_use]
    pub fn blacklist_only(mut self, enabled: bool) -> Self {
        self.blacklist_only = enabled;
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        RateLimitMiddleware {
            limiter: self.limiter,
            trust_forwarded_for: self.trust_forwarded_for,
            blacklist_only: self.blacklist_only,
        }
    }
}

impl RateLimitMiddleware {
    /// Creates a new builder around a shared limiter.
    #[must_use]
    pub fn builder(limiter: Arc<RateLimiter>) -> RateLimitBuilder {
        RateLimitBuilder::new(limiter)
    }

    /// Creates the stage from settings.
    #[must_use]
    pub fn from_settings(limiter: Arc<RateLimiter>, settings: &RateLimitSettings) -> Self {
        Self::builder(limiter)
            .trust_forwarded_for(settings.trust_forwarded_for)
            .build()
    }

    /// Returns the shared limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn client_key(&self, request: &Request, ctx: &MiddlewareContext) -> String {
        if self.trust_forwarded_for {
            let forwarded = request
                .headers()
                .get(FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        ctx.client_ip()
            .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ip| ip.to_string())
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let client = self.client_key(&request, ctx);

            if !self.limiter.is_ip_allowed(&client) {
                record_admission(OUTCOME_BLOCKED_IP);
                ctx.mark_short_circuit(self.name());
                return Ok(Response::json_error(
                    StatusCode::FORBIDDEN,
                    IP_NOT_ALLOWED_MESSAGE,
                ));
            }

            if self.blacklist_only {
                return next.run(ctx, request).await;
            }

            match self.limiter.check(ctx.tokens()) {
                Admission::Admitted(_) => {
                    record_admission(OUTCOME_ADMITTED);
                    next.run(ctx, request).await
                }
                Admission::Denied(reason) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        client_ip = %client,
                        reason = %reason,
                        "request rejected by rate limiter"
                    );
                    record_admission(reason.as_str());
                    ctx.mark_short_circuit(self.name());
                    Ok(Response::json_error(
                        StatusCode::TOO_MANY_REQUESTS,
                        TOO_MANY_REQUESTS_MESSAGE,
                    ))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{body_json, request, request_with_header, run_ok};
    use bulwark_limiter::Limits;
    use std::net::IpAddr;

    fn limiter(limits: Limits) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(limits))
    }

    fn ctx_from(ip: &str) -> MiddlewareContext {
        MiddlewareContext::new().with_client_ip(ip.parse::<IpAddr>().unwrap())
    }

    #[tokio::test]
    async fn test_second_request_gets_429() {
        let stage = RateLimitMiddleware::builder(limiter(Limits::new(1, 100, 100))).build();

        let mut ctx = ctx_from("198.51.100.4");
        let first = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let mut ctx = ctx_from("198.51.100.4");
        let second = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ctx.short_circuited_by(), Some("rate_limit"));
        assert_eq!(
            body_json(second).await,
            serde_json::json!({"error": "Too many requests"})
        );
    }

    #[tokio::test]
    async fn test_blacklisted_ip_gets_403_without_spending_budget() {
        let shared = Arc::new(
            RateLimiter::builder()
                .limits(Limits::new(1, 100, 100))
                .blacklist(["203.0.113.66"])
                .build(),
        );
        let stage = RateLimitMiddleware::builder(Arc::clone(&shared)).build();

        let mut ctx = ctx_from("203.0.113.66");
        let response = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "IP address is not allowed"})
        );
        assert_eq!(shared.snapshot().usage.requests_this_minute, 0);
    }

    #[tokio::test]
    async fn test_context_tokens_are_charged() {
        let shared = limiter(Limits::new(10, 5, 100));
        let stage = RateLimitMiddleware::builder(Arc::clone(&shared)).build();

        let mut ctx = ctx_from("198.51.100.4").with_tokens(4);
        let response = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(shared.snapshot().usage.tokens_this_minute, 4);

        let mut ctx = ctx_from("198.51.100.4").with_tokens(2);
        let response = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_blacklist_only_never_charges_budget() {
        let shared = Arc::new(
            RateLimiter::builder()
                .limits(Limits::new(1, 1, 1))
                .blacklist(["203.0.113.66"])
                .build(),
        );
        let stage = RateLimitMiddleware::builder(Arc::clone(&shared))
            .blacklist_only(true)
            .build();

        for _ in 0..3 {
            let mut ctx = ctx_from("198.51.100.4");
            let response = run_ok(&stage, &mut ctx, request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(shared.snapshot().usage.requests_this_minute, 0);

        let mut ctx = ctx_from("203.0.113.66");
        let response = run_ok(&stage, &mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_client_key_prefers_peer_address() {
        let stage = RateLimitMiddleware::builder(limiter(Limits::default())).build();
        let ctx = ctx_from("192.0.2.1");
        let req = request_with_header("x-forwarded-for", "203.0.113.66");
        assert_eq!(stage.client_key(&req, &ctx), "192.0.2.1");
    }

    #[test]
    fn test_client_key_trusts_forwarded_for_when_enabled() {
        let stage = RateLimitMiddleware::builder(limiter(Limits::default()))
            .trust_forwarded_for(true)
            .build();
        let ctx = ctx_from("192.0.2.1");
        let req = request_with_header("x-forwarded-for", "203.0.113.66, 10.0.0.1");
        assert_eq!(stage.client_key(&req, &ctx), "203.0.113.66");
    }

    #[test]
    fn test_client_key_unknown() {
        let stage = RateLimitMiddleware::builder(limiter(Limits::default())).build();
        let ctx = MiddlewareContext::new();
        assert_eq!(stage.client_key(&request(), &ctx), "unknown");
    }

    #[test]
    fn test_from_settings() {
        let settings = RateLimitSettings {
            trust_forwarded_for: true,
        };
        let stage = RateLimitMiddleware::from_settings(limiter(Limits::default()), &settings);
        assert!(stage.trust_forwarded_for);
        assert_eq!(stage.name(), "rate_limit");
    }
}
