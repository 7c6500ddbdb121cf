//! Typed configuration for the Bulwark gateway.
//!
//! This crate provides a strongly-typed configuration system with support
//! for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! [`BulwarkConfig`] holds every section:
//!
//! - [`ServerConfig`] - bind address, shutdown timeout, body limit
//! - [`UpstreamConfig`] - where admitted requests are forwarded
//! - `middleware` - which pipeline stages are on
//! - [`LimitsConfig`] - limiter ceilings and IP lists
//! - `cors`, `gzip`, `session`, `trusted_host`, `timeout`, `rate_limit` -
//!   per-stage settings
//! - `logging` - log level and format
//! - [`AdminConfig`] - internal endpoints
//!
//! # Example
//!
//! ```no_run
//! use bulwark_config::ConfigLoader;
//!
//! # fn main() -> Result<(), bulwark_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_file("bulwark.toml")?
//!     .with_env_prefix("BULWARK")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8000"
//! max_body_bytes = 10485760
//!
//! [upstream]
//! url = "http://127.0.0.1:9000"
//!
//! [middleware]
//! rate_limit = true
//!
//! [limits]
//! max_requests_per_minute = 5
//! max_tokens_per_minute = 5
//! max_requests_per_day = 100
//! blacklist = ["203.0.113.9"]
//!
//! [trusted_host]
//! allowed_hosts = ["api.example.com", "*.internal.example"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `BULWARK__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `BULWARK__MIDDLEWARE__RATE_LIMIT=true`
//! - `BULWARK__LIMITS__BLACKLIST=203.0.113.9,198.51.100.7`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::BulwarkConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{AdminConfig, LimitsConfig, ServerConfig, UpstreamConfig};
