//! Declarative pipeline configuration.
//!
//! [`MiddlewareConfig`] says which stages are on. [`MiddlewareSettings`]
//! holds the tunables each stage reads when it is on. Both deserialize from
//! the gateway's configuration file.

use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

/// Which stages are enabled.
///
/// Every stage except rate limiting is on unless switched off.
///
/// # Example
///
/// ```
/// use bulwark_middleware::config::MiddlewareConfig;
/// use bulwark_middleware::pipeline::Stage;
///
/// let config = MiddlewareConfig::from_flags([("rate_limit", true), ("gzip", false)]);
/// assert!(config.is_enabled(Stage::RateLimit));
/// assert!(!config.is_enabled(Stage::Gzip));
/// assert!(config.is_enabled(Stage::Cors));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareConfig {
    /// CORS headers and pre-flight handling.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Response compression.
    #[serde(default = "default_true")]
    pub gzip: bool,

    /// Signed cookie session.
    #[serde(default = "default_true")]
    pub session: bool,

    /// Host header validation.
    #[serde(default = "default_true")]
    pub trusted_host: bool,

    /// Fault to 500 conversion.
    #[serde(default = "default_true")]
    pub error_handling: bool,

    /// Blacklist and budget enforcement.
    #[serde(default)]
    pub rate_limit: bool,

    /// Handler deadline.
    #[serde(default = "default_true")]
    pub timeout: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            cors: true,
            gzip: true,
            session: true,
            trusted_host: true,
            error_handling: true,
            rate_limit: false,
            timeout: true,
        }
    }
}

impl MiddlewareConfig {
    /// Builds a config from `(name, enabled)` pairs over the defaults.
    ///
    /// Unknown names are logged and ignored.
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for (name, enabled) in flags {
            match Stage::from_name(name.as_ref()) {
                Some(stage) => config.set_enabled(stage, enabled),
                None => tracing::warn!(name = name.as_ref(), "ignoring unknown middleware flag"),
            }
        }
        config
    }

    /// Returns whether `stage` is enabled.
    #[must_use]
    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Cors => self.cors,
            Stage::Gzip => self.gzip,
            Stage::Session => self.session,
            Stage::TrustedHost => self.trusted_host,
            Stage::ErrorHandling => self.error_handling,
            Stage::RateLimit => self.rate_limit,
            Stage::Timeout => self.timeout,
        }
    }

    /// Turns `stage` on or off.
    pub fn set_enabled(&mut self, stage: Stage, enabled: bool) {
        let flag = match stage {
            Stage::Cors => &mut self.cors,
            Stage::Gzip => &mut self.gzip,
            Stage::Session => &mut self.session,
            Stage::TrustedHost => &mut self.trusted_host,
            Stage::ErrorHandling => &mut self.error_handling,
            Stage::RateLimit => &mut self.rate_limit,
            Stage::Timeout => &mut self.timeout,
        };
        *flag = enabled;
    }

    /// Returns the enabled stages in pipeline order.
    #[must_use]
    pub fn enabled_stages(&self) -> Vec<Stage> {
        Stage::all()
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }
}

/// Per-stage tunables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSettings {
    /// CORS policy.
    #[serde(default)]
    pub cors: CorsSettings,

    /// Compression settings.
    #[serde(default)]
    pub gzip: GzipSettings,

    /// Session cookie settings.
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
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

/// CORS policy. The default allows any origin, method and header, with
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsSettings {
    /// Allowed origins; `"*"` allows any.
    #[serde(default = "wildcard")]
    pub allow_origins: Vec<String>,

    /// Allowed methods; `"*"` allows any.
    #[serde(default = "wildcard")]
    pub allow_methods: Vec<String>,

    /// Allowed request headers; `"*"` allows any.
    #[serde(default = "wildcard")]
    pub allow_headers: Vec<String>,

    /// Whether to send `Access-Control-Allow-Credentials: true`.
    #[serde(default = "default_true")]
    pub allow_credentials: bool,

    /// Headers exposed to scripts.
    #[serde(default)]
    pub expose_headers: Vec<String>,

    /// Pre-flight cache lifetime in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

fn default_cors_max_age() -> u64 {
    600
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allow_origins: wildcard(),
            allow_methods: wildcard(),
            allow_headers: wildcard(),
            allow_credentials: true,
            expose_headers: Vec::new(),
            max_age_secs: default_cors_max_age(),
        }
    }
}

/// Default smallest body worth compressing, in bytes.
pub const DEFAULT_GZIP_MINIMUM_SIZE: usize = 1000;

/// Compression settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GzipSettings {
    /// Bodies smaller than this are sent as they are.
    #[serde(default = "default_gzip_minimum_size")]
    pub minimum_size: usize,

    /// Compression level, 0-9.
    #[serde(default = "default_gzip_level")]
    pub level: u32,
}

fn default_gzip_minimum_size() -> usize {
    DEFAULT_GZIP_MINIMUM_SIZE
}

fn default_gzip_level() -> u32 {
    9
}

impl Default for GzipSettings {
    fn default() -> Self {
        Self {
            minimum_size: DEFAULT_GZIP_MINIMUM_SIZE,
            level: default_gzip_level(),
        }
    }
}

/// Default session lifetime: 14 days.
pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 14 * 24 * 60 * 60;

/// Session cookie settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    /// Signing key. A random key is generated per process when unset, so
    /// sessions do not survive a restart.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Cookie name.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Cookie lifetime in seconds; `None` makes it a browser-session cookie.
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: Option<u64>,

    /// Cookie path.
    #[serde(default = "default_session_path")]
    pub path: String,

    /// `SameSite` attribute.
    #[serde(default = "default_same_site")]
    pub same_site: String,

    /// Whether to mark the cookie `Secure`.
    #[serde(default)]
    pub https_only: bool,
}

fn default_session_cookie() -> String {
    "session".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_session_max_age() -> Option<u64> {
    Some(DEFAULT_SESSION_MAX_AGE_SECS)
}

fn default_session_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "lax".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secret_key: None,
            cookie_name: default_session_cookie(),
            max_age_secs: default_session_max_age(),
            path: default_session_path(),
            same_site: default_same_site(),
            https_only: false,
        }
    }
}

/// Allowed Host header values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedHostSettings {
    /// Exact hosts, `*.domain` suffix patterns, or `"*"` for any.
    #[serde(default = "wildcard")]
    pub allowed_hosts: Vec<String>,
}

impl Default for TrustedHostSettings {
    fn default() -> Self {
        Self {
            allowed_hosts: wildcard(),
        }
    }
}

/// Default handler deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    /// Deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl TimeoutSettings {
    /// The deadline as a [`Duration`].
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How the rate-limit stage identifies the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Use the first `X-Forwarded-For` address instead of the peer address.
    /// Only safe behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}
