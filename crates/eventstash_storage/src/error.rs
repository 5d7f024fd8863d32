//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// These never cross the producer or consumer boundary: [`crate::FileWriter`]
/// and [`crate::FileReader`] turn them into diagnostics.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A batch file contains bytes that are not valid records.
    #[error("batch file corrupted: {0}")]
    Corrupted(String),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// An encryption key of the wrong length was supplied.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// A single framed event is larger than the configured object limit.
    #[error("event too large: {size} bytes exceeds maximum of {max} bytes")]
    ObjectTooLarge {
        /// Framed size of the rejected event.
        size: u64,
        /// Configured `max_object_size`.
        max: u64,
    },

    /// The files configuration is not usable.
    #[error("invalid files configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
