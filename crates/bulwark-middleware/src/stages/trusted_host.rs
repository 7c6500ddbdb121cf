//! Host header validation.
//!
//! Rejects requests whose `Host` is not in the allow list with
//! `400 Invalid host header`. Entries are exact host names, `*.domain`
//! patterns matching any subdomain of `domain`, or `"*"` for any host.

use crate::config::TrustedHostSettings;
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::{header, StatusCode};

/// Body of the rejection response.
pub const INVALID_HOST_MESSAGE: &str = "Invalid host header";

/// Trusted-host middleware.
#[derive(Debug, Clone)]
pub struct TrustedHostMiddleware {
    allow_any: bool,
    allowed_hosts: Vec<String>,
}

impl Default for TrustedHostMiddleware {
    fn default() -> Self {
        Self::new(["*"])
    }
}

impl TrustedHostMiddleware {
    /// Creates the stage from an allow list.
    #[must_use]
    pub fn new<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed_hosts: Vec<String> = allowed_hosts
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        Self {
            allow_any: allowed_hosts.iter().any(|h| h == "*"),
            allowed_hosts,
        }
    }

    /// Creates the stage from settings.
    #[must_use]
    pub fn from_settings(settings: &TrustedHostSettings) -> Self {
        Self::new(settings.allowed_hosts.iter().cloned())
    }

    /// Returns true if `host` (without port) matches the allow list.
    #[must_use]
    pub fn is_allowed(&self, host: &str) -> bool {
        if self.allow_any {
            return true;
        }

        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                host.ends_with(suffix)
            } else {
                *pattern == host
            }
        })
    }
}

/// Strips the port from a Host header value.
fn host_without_port(value: &str) -> &str {
    if let Some(rest) = value.strip_prefix('[') {
        // IPv6 literal: "[::1]:8000"
        return rest.split(']').next().unwrap_or(rest);
    }
    value.split(':').next().unwrap_or(value)
}

impl Middleware for TrustedHostMiddleware {
    fn name(&self) -> &'static str {
        "trusted_host"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            if self.allow_any {
                return next.run(ctx, request).await;
            }

            let host = request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .or_else(|| request.uri().host())
                .map(host_without_port)
                .unwrap_or_default();

            if !self.is_allowed(host) {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    host,
                    "rejected untrusted host"
                );
                ctx.mark_short_circuit(self.name());
                return Ok(Response::text(StatusCode::BAD_REQUEST, INVALID_HOST_MESSAGE));
            }

            next.run(ctx, request).await
        })
    }
}
