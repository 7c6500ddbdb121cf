//! Errors raised while loading and validating a Bulwark config.

use std::path::PathBuf;
use thiserror::Error;

/// Why a [`BulwarkConfig`](crate::BulwarkConfig) could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `--config` pointed at a path that does not exist.
    #[error("config file {path} does not exist")]
    Missing {
        /// The requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {path}")]
    Unreadable {
        /// The requested path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML, or a key the schema does not know.
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON, or a key the schema does not know.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither TOML nor JSON.
    #[error("unsupported config format {0:?}, expected toml or json")]
    UnsupportedFormat(String),

    /// A `.env` file exists but does not parse.
    #[error("cannot load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// A `BULWARK__*` variable whose value does not parse.
    #[error("environment override {var}: {reason}")]
    EnvOverride {
        /// Full variable name.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// `BULWARK__MIDDLEWARE__<STAGE>` with a stage that does not exist.
    #[error("environment override {var}: unknown middleware stage {stage:?}")]
    UnknownStage {
        /// Full variable name.
        var: String,
        /// Stage name as written.
        stage: String,
    },

    /// A value that loaded but fails validation, such as a non-http
    /// upstream URL.
    #[error("{field}: {reason}")]
    InvalidField {
        /// Dotted path of the field, e.g. `upstream.url`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn env_override(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// A validation failure on `field`.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
