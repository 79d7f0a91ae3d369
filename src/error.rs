//! Engine error taxonomy.
//!
//! One `thiserror` enum covering the engine's failure classes. `anyhow`
//! stays at the app/wiring layer; these typed variants are what the runtime
//! and API layers match on.

use thiserror::Error;

/// Errors produced by the workflow engine and its runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node referenced a node type with no registered handler.
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    /// A node handler exceeded its configured timeout.
    #[error("node timed out after {timeout_ms}ms")]
    NodeTimeout { timeout_ms: u64 },

    /// A node handler failed (syntax error, runtime error, or bad config).
    #[error("{0}")]
    Handler(String),

    /// A workflow definition failed validation.
    #[error("{0}")]
    Validation(String),

    /// An inbound webhook did not match any registered route.
    #[error("no webhook registered for {method} {path}")]
    WebhookNotRegistered { method: String, path: String },

    /// A schedule expression could not be parsed.
    #[error(
        "unsupported schedule expression '{expression}'; supported formats: \
         'every N minutes', 'every N hours', 'daily at HH:MM', 'weekly on <day-name>'"
    )]
    ScheduleParse { expression: String },
}

impl EngineError {
    /// Construct a [`EngineError::Handler`].
    pub fn handler(message: impl Into<String>) -> Self {
        EngineError::Handler(message.into())
    }

    /// Construct a [`EngineError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }
}
