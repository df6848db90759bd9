//! Error taxonomy for path resolution, store access, and action decoding.
//!
//! None of these escape the action pipeline: the executor and codec convert
//! each one into an error result record.

use thiserror::Error;

/// Failure resolving or mutating a document path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("not a container: {path}")]
    NotContainer { path: String },
}

impl StoreError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure turning one tagged action block into an executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("action block has no <kind>")]
    MissingKind,

    #[error("action block is missing </action>")]
    Unterminated,

    #[error("{kind} requires <{field}>")]
    MissingField { kind: String, field: &'static str },

    #[error("unknown action kind '{kind}'")]
    UnknownKind { kind: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
