//! Structured logging.
//!
//! `RUST_LOG`, when set, takes precedence over the configured level.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive (e.g. "info", "bulwark_gateway=debug,hyper=warn").
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Whether to include file and line of the call site.
    #[serde(default)]
    pub file_line_info: bool,

    /// Whether to include the module path.
    #[serde(default = "default_true")]
    pub include_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Json,
            file_line_info: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Debug level, pretty output with call sites.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            file_line_info: true,
            include_target: true,
        }
    }

    /// Info level, JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

/// Installs the global log subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the level does not parse or a
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => create_env_filter(&config.level)?,
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.file_line_info)
                .with_line_number(config.file_line_info)
                .with_target(config.include_target)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    Ok(())
}

/// Parses a filter directive.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Field names shared by every Bulwark log line.
pub mod fields {
    /// Request ID field name.
    pub const REQUEST_ID: &str = "request_id";

    /// Client address field name.
    pub const CLIENT_IP: &str = "client_ip";

    /// HTTP method field name.
    pub const HTTP_METHOD: &str = "http.method";

    /// HTTP path field name.
    pub const HTTP_PATH: &str = "http.path";

    /// HTTP status code field name.
    pub const HTTP_STATUS: &str = "http.status_code";

    /// Duration field name (in milliseconds).
    pub const DURATION_MS: &str = "duration_ms";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_production() {
        assert_eq!(LogConfig::default(), LogConfig::production());
        assert_eq!(LogConfig::default().format, LogFormat::Json);
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file_line_info);
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("bulwark_gateway=debug,hyper=warn").is_ok());
        assert!(create_env_filter("bulwark=notalevel").is_err());
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "warn", "format": "pretty"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "warn");
        assert!(config.include_target);
    }
}
