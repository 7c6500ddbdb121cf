//! Configuration schema types.
//!
//! This module defines the gateway-level sections. The middleware and
//! logging sections reuse the types of the crates that consume them.

use bulwark_limiter::{
    Limits, DEFAULT_MAX_REQUESTS_PER_DAY, DEFAULT_MAX_REQUESTS_PER_MINUTE,
    DEFAULT_MAX_TOKENS_PER_MINUTE,
};
use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use bulwark_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "127.0.0.1:8000".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.shutdown_timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP bind address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Largest request body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// The service admitted requests are forwarded to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL; the request path and query are appended.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Transport timeout in seconds. The pipeline's timeout stage usually
    /// fires first.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_upstream_timeout() -> u64 {
    60
}

/// Limiter ceilings and IP lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Requests admitted per minute window.
    #[serde(default = "default_requests_per_minute")]
    pub max_requests_per_minute: u64,

    /// Tokens admitted per minute window.
    #[serde(default = "default_tokens_per_minute")]
    pub max_tokens_per_minute: u64,

    /// Requests admitted per day window.
    #[serde(default = "default_requests_per_day")]
    pub max_requests_per_day: u64,

    /// Client addresses listed for reference. Not consulted on admission.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Client addresses refused with 403.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

fn default_requests_per_minute() -> u64 {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

fn default_tokens_per_minute() -> u64 {
    DEFAULT_MAX_TOKENS_PER_MINUTE
}

fn default_requests_per_day() -> u64 {
    DEFAULT_MAX_REQUESTS_PER_DAY
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_tokens_per_minute: DEFAULT_MAX_TOKENS_PER_MINUTE,
            max_requests_per_day: DEFAULT_MAX_REQUESTS_PER_DAY,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl LimitsConfig {
    /// The three ceilings.
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits::new(
            self.max_requests_per_minute,
            self.max_tokens_per_minute,
            self.max_requests_per_day,
        )
    }
}

/// Internal `/_bulwark/*` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Serve the internal endpoints at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bearer token required to change limits. Without one, limit updates
    /// are refused.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, "0.0.0.0:8000");
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_limits_defaults_match_limiter() {
        assert_eq!(LimitsConfig::default().limits(), Limits::default());
    }

    #[test]
    fn test_limits_partial() {
        let config: LimitsConfig = toml::from_str(
            r#"
            max_requests_per_minute = 60
            blacklist = ["203.0.113.9"]
            "#,
        )
        .unwrap();
        assert_eq!(config.limits(), Limits::new(60, 5, 100));
        assert_eq!(config.blacklist, vec!["203.0.113.9"]);
        assert!(config.whitelist.is_empty());
    }

    #[test]
    fn test_admin_defaults() {
        let config = AdminConfig::default();
        assert!(config.enabled);
        assert!(config.token.is_none());
    }
}
