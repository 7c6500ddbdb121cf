//! Response compression.
//!
//! Gzips the response body when the client sent `Accept-Encoding: gzip`
//! and the body is at least `minimum_size` bytes. Responses that already
//! carry a `Content-Encoding`, and `text/event-stream` responses, are left
//! alone.

use crate::config::{GzipSettings, DEFAULT_GZIP_MINIMUM_SIZE};
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{header, HeaderValue};
use http_body_util::{BodyExt, Full};
use std::io::Write;

/// Gzip compression middleware.
#[derive(Debug, Clone)]
pub struct GzipMiddleware {
    minimum_size: usize,
    level: u32,
}

impl Default for GzipMiddleware {
    fn default() -> Self {
        GzipBuilder::new().build()
    }
}

/// Builder for [`GzipMiddleware`].
#[derive(Debug, Clone)]
pub struct GzipBuilder {
    minimum_size: usize,
    level: u32,
}

impl Default for GzipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipBuilder {
    /// Creates a builder with a 1000 byte threshold and level 9.
    #[must_use]
    pub fn new() -> Self {
        Self {
            minimum_size: DEFAULT_GZIP_MINIMUM_SIZE,
            level: 9,
        }
    }

    /// Sets the smallest body worth compressing.
    #[must_use]
    pub fn minimum_size(mut self, bytes: usize) -> Self {
        self.minimum_size = bytes;
        self
    }

    /// Sets the compression level, clamped to 0-9.
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Builds the middleware.
    #[must_use]
    pub fn build(self) -> GzipMiddleware {
        GzipMiddleware {
            minimum_size: self.minimum_size,
            level: self.level,
        }
    }
}

impl GzipMiddleware {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> GzipBuilder {
        GzipBuilder::new()
    }

    /// Creates the stage from settings.
    #[must_use]
    pub fn from_settings(settings: &GzipSettings) -> Self {
        GzipBuilder::new()
            .minimum_size(settings.minimum_size)
            .level(settings.level)
            .build()
    }

    /// Returns the compression threshold in bytes.
    #[must_use]
    pub fn minimum_size(&self) -> usize {
        self.minimum_size
    }

    fn accepts_gzip(request: &Request) -> bool {
        request
            .headers()
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| {
                token
                    .split(';')
                    .next()
                    .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("gzip"))
            })
    }

    fn is_compressible(response: &Response) -> bool {
        if response.headers().contains_key(header::CONTENT_ENCODING) {
            return false;
        }
        !response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"))
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }
}

impl Middleware for GzipMiddleware {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let accepts_gzip = Self::accepts_gzip(&request);
            let response = next.run(ctx, request).await?;

            if !accepts_gzip || !Self::is_compressible(&response) {
                return Ok(response);
            }

            let (mut parts, body) = response.into_parts();
            let body: Bytes = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();

            if body.len() < self.minimum_size {
                return Ok(Response::from_parts(parts, Full::new(body)));
            }

            match self.compress(&body) {
                Ok(compressed) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        original = body.len(),
                        compressed = compressed.len(),
                        "compressed response"
                    );
                    parts
                        .headers
                        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                    parts
                        .headers
                        .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
                    Ok(Response::from_parts(parts, Full::new(Bytes::from(compressed))))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "gzip failed, sending uncompressed");
                    Ok(Response::from_parts(parts, Full::new(body)))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::chain;
    use crate::stages::test_support::{body_bytes, request, request_with_header, run_ok};
    use crate::types::ResponseExt;
    use flate2::read::GzDecoder;
    use http::StatusCode;
    use std::io::Read;

    fn large_body() -> String {
        "bulwark admission control ".repeat(100)
    }

    fn gunzip(data: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(data).read_to_string(&mut out).unwrap();
        out
    }

    async fn run_with_body(stage: &GzipMiddleware, req: Request, body: String) -> Response {
        let mut ctx = MiddlewareContext::new();
        let handler = Next::handler(move |_ctx, _req| {
            Box::pin(async move { Ok(Response::text(StatusCode::OK, &body)) })
        });
        chain(stage, handler).run(&mut ctx, req).await.unwrap()
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(GzipMiddleware::accepts_gzip(&request_with_header(
            "accept-encoding",
            "br, gzip;q=0.8"
        )));
        assert!(GzipMiddleware::accepts_gzip(&request_with_header(
            "accept-encoding",
            "GZIP"
        )));
        assert!(!GzipMiddleware::accepts_gzip(&request_with_header(
            "accept-encoding",
            "deflate, br"
        )));
        assert!(!GzipMiddleware::accepts_gzip(&request()));
    }

    #[tokio::test]
    async fn test_large_body_is_compressed() {
        let stage = GzipMiddleware::default();
        let body = large_body();
        let response = run_with_body(
            &stage,
            request_with_header("accept-encoding", "gzip"),
            body.clone(),
        )
        .await;

        let headers = response.headers().clone();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get(header::VARY).unwrap(), "Accept-Encoding");

        let bytes = body_bytes(response).await;
        assert!(bytes.len() < body.len());
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).unwrap(),
            &bytes.len().to_string()
        );
        assert_eq!(gunzip(&bytes), body);
    }

    #[tokio::test]
    async fn test_small_body_is_not_compressed() {
        let mut ctx = MiddlewareContext::new();
        let response = run_ok(
            &GzipMiddleware::default(),
            &mut ctx,
            request_with_header("accept-encoding", "gzip"),
        )
        .await
        .unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_bytes(response).await, "OK");
    }

    #[tokio::test]
    async fn test_without_accept_encoding_is_untouched() {
        let stage = GzipMiddleware::default();
        let body = large_body();
        let response = run_with_body(&stage, request(), body.clone()).await;

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_bytes(response).await, body.as_str());
    }

    #[tokio::test]
    async fn test_already_encoded_response_is_untouched() {
        let stage = GzipMiddleware::builder().minimum_size(0).build();
        let mut ctx = MiddlewareContext::new();
        let handler = Next::handler(|_ctx, _req| {
            Box::pin(async {
                let mut response = Response::text(StatusCode::OK, "already compressed");
                response
                    .headers_mut()
                    .insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
                Ok(response)
            })
        });

        let response = chain(&stage, handler)
            .run(&mut ctx, request_with_header("accept-encoding", "gzip"))
            .await
            .unwrap();
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "br");
    }

    #[test]
    fn test_from_settings() {
        let stage = GzipMiddleware::from_settings(&GzipSettings {
            minimum_size: 42,
            level: 20,
        });
        assert_eq!(stage.minimum_size(), 42);
        assert_eq!(stage.level, 9);
    }
}
