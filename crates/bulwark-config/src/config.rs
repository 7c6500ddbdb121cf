//! Main configuration type.

use bulwark_middleware::config::{
    CorsSettings, GzipSettings, MiddlewareConfig, MiddlewareSettings, RateLimitSettings,
    SessionSettings, TimeoutSettings, TrustedHostSettings,
};
use bulwark_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

use crate::{AdminConfig, ConfigError, LimitsConfig, ServerConfig, UpstreamConfig};

const SAME_SITE_VALUES: [&str; 3] = ["lax", "strict", "none"];

/// Complete Bulwark configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use bulwark_config::BulwarkConfig;
///
/// let config = BulwarkConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8000");
/// assert!(!config.middleware.rate_limit);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct BulwarkConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Where admitted requests go.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Which pipeline stages are on.
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Limiter ceilings and IP lists.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// CORS policy.
    #[serde(default)]
    pub cors: CorsSettings,

    /// Compression.
    #[serde(default)]
    pub gzip: GzipSettings,

    /// Session cookie.
    #[serde(default)]
    pub session: SessionSettings,

    /// Allowed Host headers.
    #[serde(default)]
    pub trusted_host: TrustedHostSettings,

    /// Handler deadline.
    #[serde(default)]
    pub timeout: TimeoutSettings,

    /// Client identification for rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Log output.
    #[serde(default)]
    pub logging: LogConfig,

    /// Internal endpoints.
    #[serde(default)]
    pub admin: AdminConfig,
}

impl BulwarkConfig {
    /// Collects the per-stage sections for the pipeline builder.
    #[must_use]
    pub fn middleware_settings(&self) -> MiddlewareSettings {
        MiddlewareSettings {
            cors: self.cors.clone(),
            gzip: self.gzip.clone(),
            session: self.session.clone(),
            trusted_host: self.trusted_host.clone(),
            timeout: self.timeout.clone(),
            rate_limit: self.rate_limit.clone(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an unparsable bind address, a
    /// non-HTTP upstream, a zero timeout or body limit, an invalid log
    /// filter, an empty host allow list, or an out-of-range cookie or gzip
    /// setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_field(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_field(
                "server.max_body_bytes",
                "must be greater than 0",
            ));
        }

        let upstream_ok = self
            .upstream
            .url
            .parse::<http::Uri>()
            .ok()
            .is_some_and(|uri| {
                matches!(uri.scheme_str(), Some("http" | "https")) && uri.host().is_some()
            });
        if !upstream_ok {
            return Err(ConfigError::invalid_field(
                "upstream.url",
                format!("expected an http(s) URL, got {}", self.upstream.url),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::invalid_field(
                "upstream.timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.timeout.timeout_ms == 0 {
            return Err(ConfigError::invalid_field(
                "timeout.timeout_ms",
                "must be greater than 0",
            ));
        }

        if let Err(e) = bulwark_telemetry::logging::create_env_filter(&self.logging.level) {
            return Err(ConfigError::invalid_field("logging.level", e.to_string()));
        }

        if self.trusted_host.allowed_hosts.is_empty() {
            return Err(ConfigError::invalid_field(
                "trusted_host.allowed_hosts",
                "must not be empty; use [\"*\"] to allow any host",
            ));
        }

        if self.gzip.level > 9 {
            return Err(ConfigError::invalid_field("gzip.level", "must be between 0 and 9"));
        }

        if !SAME_SITE_VALUES.contains(&self.session.same_site.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid_field(
                "session.same_site",
                "expected 'lax', 'strict', or 'none'",
            ));
        }

        Ok(())
    }
}
