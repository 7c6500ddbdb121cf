//! Forwarding admitted requests to the upstream service.

use std::time::Duration;

use bulwark_config::UpstreamConfig;
use bulwark_middleware::{Request, Response};
use http::header::{HeaderMap, CONTENT_LENGTH, HOST};
use http_body_util::{BodyExt, Full};
use reqwest::Client;

use crate::error::{GatewayError, GatewayResult};

/// HTTP client bound to one upstream base URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    /// Builds a client for `config.url`.
    pub fn new(config: &UpstreamConfig) -> GatewayResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::upstream(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Sends `request` upstream and relays whatever comes back.
    ///
    /// Upstream error statuses are ordinary responses. Only transport
    /// failures are errors.
    pub async fn forward(&self, request: Request) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let url = format!("{}{}", self.base_url, path);

        let body = body
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .unwrap_or_default();

        let response = self
            .client
            .request(parts.method, &url)
            .headers(filter_request_headers(&parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let headers = filter_response_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::upstream(format!("failed to read upstream body: {e}")))?;

        let mut relayed = http::Response::new(Full::new(body));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }

    /// Base URL requests are forwarded to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Headers that describe one connection and must not be forwarded.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

// The client sets Host and Content-Length for the new connection.
fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop_header(name.as_str())
                && name.as_str() != HOST.as_str()
                && name.as_str() != CONTENT_LENGTH.as_str()
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

// Content-Length is recomputed from the buffered body.
fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop_header(name.as_str()) && name.as_str() != CONTENT_LENGTH.as_str()
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderValue;

    #[test]
    fn test_is_hop_by_hop_header() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(is_hop_by_hop_header("upgrade"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn test_request_filter_drops_host_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("gateway.local"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));

        let filtered = filter_request_headers(&headers);
        assert!(filtered.get(HOST).is_none());
        assert!(filtered.get("content-length").is_none());
        assert!(filtered.get("connection").is_none());
        assert_eq!(filtered.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(filtered.get_all("x-tag").iter().count(), 2);
    }

    #[test]
    fn test_response_filter_keeps_cookies() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));

        let filtered = filter_response_headers(&headers);
        assert_eq!(filtered.get_all("set-cookie").iter().count(), 2);
        assert!(filtered.get("transfer-encoding").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = UpstreamClient::new(&UpstreamConfig {
            url: "http://127.0.0.1:9000/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_forward_to_closed_port_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UpstreamClient::new(&UpstreamConfig {
            url: format!("http://{addr}"),
            timeout_secs: 2,
        })
        .unwrap();
        let request = http::Request::builder()
            .uri("/v1/models")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let err = client.forward(request).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { .. }));
    }
}
