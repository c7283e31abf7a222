//! Handler-level error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a node handler's `execute` method.
///
/// The executor uses `retryable` to annotate the failed node's stored
/// `__error` output; retry itself is the handler's responsibility.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Optional machine-readable error code (e.g. `"timeout"`).
    pub code: Option<String>,
    /// Whether a caller could reasonably retry the node.
    pub retryable: bool,
}

impl HandlerError {
    /// Permanent failure; callers should not retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Transient failure; a retry may succeed.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// Attach a machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}
