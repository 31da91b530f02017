//! Error types for docsync core.

use crate::rule::AccessMode;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in docsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The rule set denied access to the path.
    #[error("forbidden: {mode} access to '{path}' denied")]
    Forbidden {
        /// Access mode that was requested.
        mode: AccessMode,
        /// Encoded path that was requested.
        path: String,
    },

    /// A document-scoped operation received a zero-length path.
    #[error("document path is empty")]
    EmptyPath,

    /// A path segment cannot be encoded unambiguously.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A required attribute is missing from a document.
    #[error("{name} is missing")]
    MissingAttribute {
        /// Name of the missing attribute.
        name: String,
    },

    /// A payload or result did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A request named an event that does not exist.
    #[error("Unknown event ({0})")]
    UnknownEvent(String),

    /// A rule predicate failed to produce a decision.
    #[error("rule evaluation failed: {0}")]
    RuleEvaluation(String),

    /// The document has been removed (its value is the tombstone).
    #[error("document has been removed")]
    DocumentRemoved,

    /// The remote end reported an error without a specific kind.
    #[error("remote error: {0}")]
    Remote(String),

    /// The transport to the remote end failed or closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request did not receive a response in time.
    #[error("request timed out")]
    Timeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal datastore or adapter error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Creates a forbidden error for the given mode and encoded path.
    pub fn forbidden(mode: AccessMode, path: impl Into<String>) -> Self {
        Self::Forbidden {
            mode,
            path: path.into(),
        }
    }

    /// Returns true if this is an authorization denial.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, CoreError::Forbidden { .. })
    }

    /// Returns true if the error was caused by malformed input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CoreError::EmptyPath
                | CoreError::InvalidPath(_)
                | CoreError::InvalidPayload(_)
                | CoreError::MissingAttribute { .. }
        )
    }
}
