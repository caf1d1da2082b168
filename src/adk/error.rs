// SPDX-License-Identifier: MIT

//! Typed error handling for outreach-rs
//!
//! Run-fatal failures propagate as `AdkError` and mark the run failed.
//! Recoverable conditions (malformed model output, sink delivery, human
//! timeouts) are handled where they occur and never surface here.

use thiserror::Error;

/// Top-level error type for workflow execution
#[derive(Debug, Error)]
pub enum AdkError {
    /// Required state is missing or malformed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An external capability (model or tool) failed or timed out
    #[error("Capability '{name}' failed: {message}")]
    Capability { name: String, message: String },

    /// Tool not registered
    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    /// Parallel children wrote different values to the same key
    #[error("State conflict on key '{key}' written by {writers:?}")]
    StateConflict { key: String, writers: Vec<String> },

    /// A loop configured to fail hard ran out of iterations without a pass
    #[error("Loop '{name}' exhausted {iterations} iterations without passing")]
    LoopExhausted { name: String, iterations: u32 },

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// Best-effort delivery to an observer failed
    #[error("Delivery to {target} failed: {message}")]
    Delivery { target: String, message: String },

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

/// Missing or malformed workflow state, arguments or definitions
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("required state key '{key}' is missing")]
    MissingKey { key: String },

    #[error("state key '{key}' is not a boolean classification: {found}")]
    NotBoolean { key: String, found: String },

    #[error("tool '{tool}' requires argument '{arg}'")]
    MissingArgument { tool: String, arg: String },

    #[error("tool '{0}' is not registered")]
    UnresolvedTool(String),

    #[error("pipeline definition is invalid: {0}")]
    InvalidDefinition(String),
}

impl AdkError {
    /// Create a capability error
    pub fn capability(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::Validation(ValidationError::MissingKey { key: key.into() })
    }

    /// True for errors that mean "the data was wrong" rather than "a call failed"
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<&str> for AdkError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for AdkError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for AdkError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, AdkError>;
