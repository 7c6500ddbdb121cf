//! Internal `/_bulwark/*` endpoints.
//!
//! These bypass the admission pipeline, so they are never rate limited,
//! compressed or timed out. The server still applies the trusted-host check
//! and the IP blacklist before they answer.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/_bulwark/health` | liveness, version and uptime |
//! | GET | `/_bulwark/ready` | 200 when serving, 503 otherwise |
//! | GET | `/_bulwark/metrics` | Prometheus text |
//! | GET | `/_bulwark/limits` | limiter snapshot |
//! | PUT | `/_bulwark/limits` | apply a partial limit update |
//!
//! `PUT /_bulwark/limits` needs `Authorization: Bearer <admin.token>` and is
//! refused with 403 when no token is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bulwark_config::AdminConfig;
use bulwark_limiter::{LimitUpdate, RateLimiter};
use bulwark_middleware::{Request, Response, ResponseExt};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Path prefix of every internal endpoint.
pub const ADMIN_PREFIX: &str = "/_bulwark/";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Body of `GET /_bulwark/health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always `"healthy"` while the process answers.
    pub status: &'static str,
    /// Gateway version.
    pub version: &'static str,
    /// Seconds since the gateway was created.
    pub uptime_seconds: u64,
}

/// Serves the internal endpoints.
#[derive(Debug)]
pub struct AdminEndpoints {
    enabled: bool,
    token: Option<String>,
    limiter: Arc<RateLimiter>,
    started_at: Instant,
    ready: AtomicBool,
}

impl AdminEndpoints {
    /// Creates the endpoints over the shared limiter. Not ready until
    /// [`set_ready`](Self::set_ready) is called.
    pub fn new(config: &AdminConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            enabled: config.enabled,
            token: config.token.clone().filter(|t| !t.is_empty()),
            limiter,
            started_at: Instant::now(),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether `path` belongs to the internal namespace.
    pub fn is_admin_path(path: &str) -> bool {
        path.starts_with(ADMIN_PREFIX)
    }

    /// Marks the gateway as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Whether the gateway reports ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Current health report.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            version: crate::VERSION,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Answers a request under [`ADMIN_PREFIX`].
    pub async fn handle(&self, request: Request) -> Response {
        if !self.enabled {
            return Response::json_error(StatusCode::NOT_FOUND, "Not found");
        }

        let endpoint = request
            .uri()
            .path()
            .strip_prefix(ADMIN_PREFIX)
            .unwrap_or_default()
            .to_string();

        match (endpoint.as_str(), request.method()) {
            ("health", &Method::GET) => json_response(StatusCode::OK, &self.health()),
            ("ready", &Method::GET) => {
                if self.is_ready() {
                    Response::json(StatusCode::OK, &serde_json::json!({"status": "ready"}))
                } else {
                    Response::json(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &serde_json::json!({"status": "not_ready"}),
                    )
                }
            }
            ("metrics", &Method::GET) => metrics_response(),
            ("limits", &Method::GET) => json_response(StatusCode::OK, &self.limiter.snapshot()),
            ("limits", &Method::PUT) => self.update_limits(request).await,
            ("health" | "ready" | "metrics" | "limits", _) => {
                Response::json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => Response::json_error(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    async fn update_limits(&self, request: Request) -> Response {
        let Some(expected) = self.token.as_deref() else {
            warn!("rejected limit update, no admin token configured");
            return Response::json_error(StatusCode::FORBIDDEN, "Limit updates are disabled");
        };
        if !bearer_matches(&request, expected) {
            warn!("rejected limit update with missing or wrong admin token");
            return Response::json_error(StatusCode::UNAUTHORIZED, "Unauthorized");
        }

        let body = request
            .into_body()
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .unwrap_or_default();

        let update: LimitUpdate = match serde_json::from_slice(&body) {
            Ok(update) => update,
            Err(e) => {
                return Response::json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid limit update: {e}"),
                );
            }
        };

        if update.is_empty() {
            info!("empty limit update, nothing changed");
        } else {
            self.limiter.update_limits(update);
        }
        json_response(StatusCode::OK, &self.limiter.snapshot())
    }
}

// The presented token must match byte for byte; no whitespace is stripped.
fn bearer_matches(request: &Request, expected: &str) -> bool {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.as_bytes().ct_eq(expected.as_bytes()).into())
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_value(body) {
        Ok(value) => Response::json(status, &value),
        Err(e) => Response::json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn metrics_response() -> Response {
    match bulwark_telemetry::metrics::render_metrics() {
        Some(text) => {
            let mut response = http::Response::new(Full::new(Bytes::from(text)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
            );
            response
        }
        None => Response::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics are not initialized",
        ),
    }
}
