//! Error types for EventStash core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in EventStash core operations.
///
/// Only [`crate::EventStorage::open`] and a handful of lower-level helpers
/// return these. Writes, reads and consent changes absorb their errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] eventstash_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another storage instance owns the directory.
    #[error("storage directory locked: {}", path.display())]
    DirectoryLocked {
        /// The locked feature directory.
        path: PathBuf,
    },

    /// The storage configuration is not usable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The task queue worker is gone.
    #[error("task queue error: {message}")]
    Queue {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a task queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }
}
