//! # AppError
//!
//! Centralized error handling for the Rusty-Board ecosystem.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

use crate::models::ThreadId;

/// Failures raised by the storage ports (record store, blob store, cache backend).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected or could not complete the request.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A record the operation depends on does not exist.
    #[error("record missing: {0}")]
    Missing(String),
}

/// The primary error type for all rb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("board /{0}/ is locked")]
    BoardLocked(String),

    #[error("board /{0}/ is archived")]
    BoardArchived(String),

    #[error("thread {thread} on /{board}/ is full")]
    ThreadFull { board: String, thread: ThreadId },

    #[error("thread {thread} on /{board}/ is locked")]
    ThreadLocked { board: String, thread: ThreadId },

    /// Image-only boards refuse threads without an attachment.
    #[error("board /{0}/ requires an image to start a thread")]
    ImageRequired(String),

    #[error("thread {thread} not found on /{board}/")]
    ThreadNotFound { board: String, thread: ThreadId },

    /// Resource not found (e.g., Board, Post)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Resource already exists (e.g., duplicate board slug)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Policy violations are always surfaced to the caller and never retried.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::BoardLocked(_)
                | Self::BoardArchived(_)
                | Self::ThreadFull { .. }
                | Self::ThreadLocked { .. }
                | Self::ImageRequired(_)
        )
    }
}

/// A specialized Result type for Rusty-Board logic.
pub type Result<T> = std::result::Result<T, AppError>;
