//! Faults raised inside the pipeline.
//!
//! Expected outcomes (403, 429, 504 and so on) are ordinary responses. A
//! [`MiddlewareError`] means something went wrong that nobody planned for.

use crate::types::Response;
use std::any::Any;
use thiserror::Error;

/// Result of a middleware stage or handler.
pub type MiddlewareResult = Result<Response, MiddlewareError>;

/// An unexpected fault.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// The request handler failed.
    #[error("{0}")]
    Handler(String),

    /// A stage failed.
    #[error("{stage}: {message}")]
    Stage {
        /// Name of the failing stage.
        stage: &'static str,
        /// What went wrong.
        message: String,
    },

    /// A panic was caught while processing the request.
    #[error("{0}")]
    Panic(String),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MiddlewareError {
    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Creates a stage error.
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    /// Converts a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::Panic(message)
    }
}
