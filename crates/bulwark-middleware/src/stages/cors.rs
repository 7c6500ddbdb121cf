//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! ## Pre-flight requests
//!
//! An `OPTIONS` request carrying both `Origin` and
//! `Access-Control-Request-Method` is answered here and never reaches the
//! handler: `200 OK` if origin, method and headers are all allowed, or
//! `400 Disallowed CORS <origin, method, headers>` naming what failed.
//!
//! ## Simple requests
//!
//! Requests with an `Origin` header pass through and get CORS headers added
//! to their response. Requests without one are untouched.
//!
//! With a wildcard origin list the response carries
//! `Access-Control-Allow-Origin: *`, except when the request has cookies and
//! credentials are allowed. Then the origin is echoed back, since browsers
//! refuse `*` on credentialed requests.
//!
//! ## Example
//!
//! ```ignore
//! use bulwark_middleware::stages::CorsMiddleware;
//! use std::time::Duration;
//!
//! let cors = CorsMiddleware::builder()
//!     .allow_origins(["https://app.example.com"])
//!     .allow_methods(["GET", "POST"])
//!     .allow_headers(["content-type", "authorization"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! ```

use crate::config::CorsSettings;
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// Allowed origin.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// Allowed methods.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// Allowed request headers.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// Whether credentials are allowed.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// Pre-flight cache lifetime.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// Headers exposed to scripts.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// Method the pre-flight asks about.
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// Headers the pre-flight asks about.
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
}

/// Methods a `"*"` method list expands to.
const ALL_METHODS: [&str; 7] = ["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"];

/// Request headers that are always allowed.
const SAFELISTED_HEADERS: [&str; 4] = ["accept", "accept-language", "content-language", "content-type"];

/// Which origins are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin.
    Any,
    /// Only these origins.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|o| o == origin),
        }
    }
}

/// CORS middleware.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    origins: AllowedOrigins,
    methods: Vec<String>,
    allow_all_headers: bool,
    /// Lower-cased, sorted, including the safelisted headers.
    allowed_headers: Vec<String>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Duration,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        CorsBuilder::new().build()
    }
}

/// Builder for [`CorsMiddleware`].
///
/// Defaults: any origin, any method, any header, credentials allowed,
/// 600 second pre-flight cache.
#[derive(Debug, Clone)]
pub struct CorsBuilder {
    origins: Vec<String>,
    methods: Vec<String>,
    headers: Vec<String>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Duration,
}

impl Default for CorsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsBuilder {
    /// Creates a builder with the permissive defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["*".to_string()],
            headers: vec!["*".to_string()],
            allow_credentials: true,
            expose_headers: Vec::new(),
            max_age: Duration::from_secs(600),
        }
    }

    /// Sets the allowed origins. `"*"` allows any.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the allowed methods. `"*"` allows any.
    #[must_use]
    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the allowed request headers. `"*"` allows any.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether credentials are allowed.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Sets the headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the pre-flight cache lifetime.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> CorsMiddleware {
        let origins = if self.origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(self.origins)
        };

        let methods = if self.methods.iter().any(|m| m == "*") {
            ALL_METHODS.iter().map(ToString::to_string).collect()
        } else {
            self.methods.iter().map(|m| m.to_ascii_uppercase()).collect()
        };

        let allow_all_headers = self.headers.iter().any(|h| h == "*");
        let mut allowed_headers: Vec<String> = SAFELISTED_HEADERS
            .iter()
            .map(ToString::to_string)
            .chain(
                self.headers
                    .iter()
                    .filter(|h| *h != "*")
                    .map(|h| h.to_ascii_lowercase()),
            )
            .collect();
        allowed_headers.sort();
        allowed_headers.dedup();

        CorsMiddleware {
            origins,
            methods,
            allow_all_headers,
            allowed_headers,
            allow_credentials: self.allow_credentials,
            expose_headers: self.expose_headers,
            max_age: self.max_age,
        }
    }
}

impl CorsMiddleware {
    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Creates the stage from settings.
    #[must_use]
    pub fn from_settings(settings: &CorsSettings) -> Self {
        CorsBuilder::new()
            .allow_origins(settings.allow_origins.iter().cloned())
            .allow_methods(settings.allow_methods.iter().cloned())
            .allow_headers(settings.allow_headers.iter().cloned())
            .allow_credentials(settings.allow_credentials)
            .expose_headers(settings.expose_headers.iter().cloned())
            .max_age(Duration::from_secs(settings.max_age_secs))
            .build()
    }

    fn allow_all_origins(&self) -> bool {
        matches!(self.origins, AllowedOrigins::Any)
    }

    /// Whether pre-flights echo the origin rather than answer `*`.
    fn preflight_echoes_origin(&self) -> bool {
        !self.allow_all_origins() || self.allow_credentials
    }

    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn handle_preflight(&self, request: &Request, origin: &HeaderValue) -> Response {
        let mut out = HeaderMap::new();
        let mut failures = Vec::new();

        let origin_str = origin.to_str().unwrap_or_default();
        if self.origins.is_allowed(origin_str) {
            if self.preflight_echoes_origin() {
                out.insert(headers::ALLOW_ORIGIN, origin.clone());
            }
        } else {
            failures.push("origin");
        }
        if self.preflight_echoes_origin() {
            out.insert(header::VARY, HeaderValue::from_static("Origin"));
        } else {
            out.insert(headers::ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }

        let requested_method = request
            .headers()
            .get(headers::REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !self.methods.iter().any(|m| m == requested_method) {
            failures.push("method");
        }

        if let Some(requested) = request.headers().get(headers::REQUEST_HEADERS) {
            if self.allow_all_headers {
                out.insert(headers::ALLOW_HEADERS, requested.clone());
            } else {
                let requested = requested.to_str().unwrap_or_default();
                let disallowed = requested
                    .split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .any(|h| !self.allowed_headers.contains(&h));
                if disallowed {
                    failures.push("headers");
                }
            }
        }
        if !self.allow_all_headers {
            if let Ok(value) = HeaderValue::from_str(&self.allowed_headers.join(", ")) {
                out.entry(headers::ALLOW_HEADERS).or_insert(value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&self.methods.join(", ")) {
            out.insert(headers::ALLOW_METHODS, value);
        }
        out.insert(headers::MAX_AGE, HeaderValue::from(self.max_age.as_secs()));
        if self.allow_credentials {
            out.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }

        let mut response = if failures.is_empty() {
            Response::text(StatusCode::OK, "OK")
        } else {
            tracing::debug!(failures = ?failures, "rejected CORS pre-flight");
            Response::text(
                StatusCode::BAD_REQUEST,
                &format!("Disallowed CORS {}", failures.join(", ")),
            )
        };
        response.headers_mut().extend(out);
        response
    }

    fn add_simple_headers(&self, response: &mut Response, origin: &HeaderValue, has_cookie: bool) {
        let headers = response.headers_mut();

        if self.allow_all_origins() {
            headers.insert(headers::ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        if self.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.expose_headers.join(", ")) {
                headers.insert(headers::EXPOSE_HEADERS, value);
            }
        }

        let echo = if self.allow_all_origins() {
            has_cookie && self.allow_credentials
        } else {
            self.origins.is_allowed(origin.to_str().unwrap_or_default())
        };
        if echo {
            headers.insert(headers::ALLOW_ORIGIN, origin.clone());
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let Some(origin) = request.headers().get(header::ORIGIN).cloned() else {
                return next.run(ctx, request).await;
            };

            if Self::is_preflight(&request) {
                ctx.mark_short_circuit(self.name());
                return Ok(self.handle_preflight(&request, &origin));
            }

            let has_cookie = request.headers().contains_key(header::COOKIE);
            let mut response = next.run(ctx, request).await?;
            self.add_simple_headers(&mut response, &origin, has_cookie);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{body_bytes, request, run_ok};
    use bytes::Bytes;
    use http_body_util::Full;

    fn simple_request(origin: &str, cookie: bool) -> Request {
        let mut builder = http::Request::builder()
            .method(Method::GET)
            .uri("/test")
            .header(header::ORIGIN, origin);
        if cookie {
            builder = builder.header(header::COOKIE, "session=abc");
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn preflight(origin: &str, method: &str, request_headers: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/test")
            .header(header::ORIGIN, origin)
            .header(headers::REQUEST_METHOD, method);
        if let Some(h) = request_headers {
            builder = builder.header(headers::REQUEST_HEADERS, h);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_no_origin_untouched() {
        let mut ctx = MiddlewareContext::new();
        let response = run_ok(&CorsMiddleware::default(), &mut ctx, request())
            .await
            .unwrap();
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_default_simple_request_gets_wildcard() {
        let mut ctx = MiddlewareContext::new();
        let response = run_ok(
            &CorsMiddleware::default(),
            &mut ctx,
            simple_request("https://app.example.com", false),
        )
        .await
        .unwrap();

        assert_eq!(response.headers().get(headers::ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            response.headers().get(headers::ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_credentialed_request_echoes_origin() {
        let mut ctx = MiddlewareContext::new();
        let response = run_ok(
            &CorsMiddleware::default(),
            &mut ctx,
            simple_request("https://app.example.com", true),
        )
        .await
        .unwrap();

        assert_eq!(
            response.headers().get(headers::ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Origin");
    }

    #[tokio::test]
    async fn test_default_preflight_answers_ok() {
        let mut ctx = MiddlewareContext::new();
        let response = run_ok(
            &CorsMiddleware::default(),
            &mut ctx,
            preflight("https://app.example.com", "POST", Some("X-Custom, Content-Type")),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.short_circuited_by(), Some("cors"));
        let h = response.headers();
        assert_eq!(h.get(headers::ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert_eq!(h.get(headers::ALLOW_HEADERS).unwrap(), "X-Custom, Content-Type");
        assert_eq!(h.get(headers::MAX_AGE).unwrap(), "600");
        assert!(h
            .get(headers::ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
        assert_eq!(body_bytes(response).await, "OK");
    }

    #[tokio::test]
    async fn test_restricted_preflight_lists_failures() {
        let cors = CorsMiddleware::builder()
            .allow_origins(["https://app.example.com"])
            .allow_methods(["GET"])
            .allow_headers(["authorization"])
            .build();
        let mut ctx = MiddlewareContext::new();

        let response = run_ok(
            &cors,
            &mut ctx,
            preflight("https://evil.example", "DELETE", Some("x-secret")),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_bytes(response).await,
            "Disallowed CORS origin, method, headers"
        );
    }

    #[tokio::test]
    async fn test_restricted_preflight_allows_safelisted_headers() {
        let cors = CorsMiddleware::builder()
            .allow_origins(["https://app.example.com"])
            .allow_methods(["get", "post"])
            .allow_headers(["Authorization"])
            .allow_credentials(false)
            .build();
        let mut ctx = MiddlewareContext::new();

        let response = run_ok(
            &cors,
            &mut ctx,
            preflight(
                "https://app.example.com",
                "POST",
                Some("authorization, content-type"),
            ),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let h = response.headers();
        assert_eq!(h.get(headers::ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert_eq!(
            h.get(headers::ALLOW_HEADERS).unwrap(),
            "accept, accept-language, authorization, content-language, content-type"
        );
        assert!(h.get(headers::ALLOW_CREDENTIALS).is_none());
    }

    #[tokio::test]
    async fn test_restricted_simple_request_from_unknown_origin() {
        let cors = CorsMiddleware::builder()
            .allow_origins(["https://app.example.com"])
            .allow_credentials(false)
            .build();
        let mut ctx = MiddlewareContext::new();

        let response = run_ok(&cors, &mut ctx, simple_request("https://evil.example", false))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_from_settings_defaults() {
        let cors = CorsMiddleware::from_settings(&CorsSettings::default());
        assert_eq!(cors.origins, AllowedOrigins::Any);
        assert!(cors.allow_all_headers);
        assert_eq!(cors.methods.len(), ALL_METHODS.len());
        assert!(cors.allow_credentials);
    }
}
