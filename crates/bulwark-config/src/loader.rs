//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use bulwark_middleware::pipeline::Stage;
use bulwark_telemetry::LogFormat;

use crate::{BulwarkConfig, ConfigError};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use bulwark_config::ConfigLoader;
///
/// # fn main() -> Result<(), bulwark_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("bulwark.toml")?
///     .with_dotenv()?
///     .with_env_prefix("BULWARK")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: BulwarkConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BulwarkConfig::default(),
            env_prefix: None,
        }
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    /// The file replaces whatever configuration was loaded before it;
    /// sections it leaves out take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read,
    /// or contains invalid or unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from an optional file.
    ///
    /// If the file exists, loads it. If not, silently continues.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `format` ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use bulwark_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [limits]
    ///     max_requests_per_minute = 60
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.limits.max_requests_per_minute, 60);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat(format.to_string()))
            }
        };
        Ok(self)
    }

    /// Load a `.env` file from the working directory into the process
    /// environment. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::Dotenv(e)),
        }
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `BULWARK__LIMITS__MAX_REQUESTS_PER_MINUTE=60` or
    /// `BULWARK__MIDDLEWARE__RATE_LIMIT=true`. List values are
    /// comma-separated.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Apply environment overrides (if a prefix was set), validate, and
    /// return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation
    /// fails.
    pub fn load(mut self) -> Result<BulwarkConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Return the configuration without env overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> BulwarkConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<BulwarkConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let mut vars: Vec<(String, String)> =
            env::vars().filter(|(k, _)| k.starts_with(&marker)).collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| {
                ConfigError::env_override(key, format!("expected {prefix}__SECTION__KEY"))
            })?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Server
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_number(key, value)?;
            }
            ["SERVER", "MAX_BODY_BYTES"] => {
                config.server.max_body_bytes = parse_number(key, value)?;
            }

            // Upstream
            ["UPSTREAM", "URL"] => config.upstream.url = value.to_string(),
            ["UPSTREAM", "TIMEOUT_SECS"] => {
                config.upstream.timeout_secs = parse_number(key, value)?;
            }

            // Middleware flags
            ["MIDDLEWARE", name] => {
                let stage = Stage::from_name(&name.to_lowercase()).ok_or_else(|| {
                    ConfigError::UnknownStage {
                        var: key.to_string(),
                        stage: name.to_lowercase(),
                    }
                })?;
                config.middleware.set_enabled(stage, parse_flag(key, value)?);
            }

            // Limits
            ["LIMITS", "MAX_REQUESTS_PER_MINUTE"] => {
                config.limits.max_requests_per_minute = parse_number(key, value)?;
            }
            ["LIMITS", "MAX_TOKENS_PER_MINUTE"] => {
                config.limits.max_tokens_per_minute = parse_number(key, value)?;
            }
            ["LIMITS", "MAX_REQUESTS_PER_DAY"] => {
                config.limits.max_requests_per_day = parse_number(key, value)?;
            }
            ["LIMITS", "WHITELIST"] => config.limits.whitelist = parse_list(value),
            ["LIMITS", "BLACKLIST"] => config.limits.blacklist = parse_list(value),

            // CORS
            ["CORS", "ALLOW_ORIGINS"] => config.cors.allow_origins = parse_list(value),
            ["CORS", "ALLOW_METHODS"] => config.cors.allow_methods = parse_list(value),
            ["CORS", "ALLOW_HEADERS"] => config.cors.allow_headers = parse_list(value),
            ["CORS", "EXPOSE_HEADERS"] => config.cors.expose_headers = parse_list(value),
            ["CORS", "ALLOW_CREDENTIALS"] => {
                config.cors.allow_credentials = parse_flag(key, value)?;
            }
            ["CORS", "MAX_AGE_SECS"] => config.cors.max_age_secs = parse_number(key, value)?,

            // Gzip
            ["GZIP", "MINIMUM_SIZE"] => config.gzip.minimum_size = parse_number(key, value)?,
            ["GZIP", "LEVEL"] => config.gzip.level = parse_number(key, value)?,

            // Session
            ["SESSION", "SECRET_KEY"] => {
                config.session.secret_key = non_empty(value);
            }
            ["SESSION", "COOKIE_NAME"] => config.session.cookie_name = value.to_string(),
            ["SESSION", "MAX_AGE_SECS"] => {
                config.session.max_age_secs = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        ConfigError::env_override(key, "expected integer or 'none'")
                    })?)
                };
            }
            ["SESSION", "PATH"] => config.session.path = value.to_string(),
            ["SESSION", "SAME_SITE"] => config.session.same_site = value.to_lowercase(),
            ["SESSION", "HTTPS_ONLY"] => config.session.https_only = parse_flag(key, value)?,

            // Trusted host
            ["TRUSTED_HOST", "ALLOWED_HOSTS"] => {
                config.trusted_host.allowed_hosts = parse_list(value);
            }

            // Timeout
            ["TIMEOUT", "TIMEOUT_MS"] => config.timeout.timeout_ms = parse_number(key, value)?,

            // Rate limit
            ["RATE_LIMIT", "TRUST_FORWARDED_FOR"] => {
                config.rate_limit.trust_forwarded_for = parse_flag(key, value)?;
            }

            // Logging
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_override(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "FILE_LINE_INFO"] => {
                config.logging.file_line_info = parse_flag(key, value)?;
            }
            ["LOGGING", "INCLUDE_TARGET"] => {
                config.logging.include_target = parse_flag(key, value)?;
            }

            // Admin
            ["ADMIN", "ENABLED"] => config.admin.enabled = parse_flag(key, value)?,
            ["ADMIN", "TOKEN"] => config.admin.token = non_empty(value),

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_override(key, "expected boolean"))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_override(key, "expected integer"))
}

/// Comma-separated list; blank entries are dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
