//! Error types for edgerec.
//!
//! This module defines all error types used throughout the edgerec crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for edgerec operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Eviction could not bring storage within budget with at least one
    /// file remaining. The pending recording cycle is skipped.
    #[error("storage exhausted: {free_bytes} bytes free, {min_free_bytes} bytes required")]
    StorageExhausted {
        /// Free bytes remaining after eviction.
        free_bytes: u64,
        /// Configured minimum free bytes.
        min_free_bytes: u64,
    },

    /// Failed to open a media file for reading or writing.
    #[error("failed to open {path}: {source}")]
    FileOpen {
        /// Path to the file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Eviction could not delete the selected oldest file.
    #[error("failed to delete {path}: {source}")]
    Deletion {
        /// Path that couldn't be deleted.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to scan the media directory.
    #[error("failed to scan media directory {path}: {source}")]
    StorageScan {
        /// Path to the media directory.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Transfer Errors ===
    /// A transfer attempt failed (timeout, non-2xx status, or connection drop).
    #[error("transfer of {path} failed on attempt {attempt}: {reason}")]
    Transfer {
        /// Path of the file being transferred.
        path: PathBuf,
        /// The attempt number that failed.
        attempt: u32,
        /// Description of what went wrong.
        reason: String,
    },

    /// The uploader was wedged in a transfer beyond the stuck threshold
    /// and was forcibly reset by the watchdog.
    #[error("uploader stuck for {elapsed_secs}s, state forcibly reset")]
    StuckState {
        /// How long the uploader had been continuously transferring.
        elapsed_secs: u64,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for edgerec operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a file-open error.
    #[must_use]
    pub fn file_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a deletion error.
    #[must_use]
    pub fn deletion(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Deletion {
            path: path.into(),
            source,
        }
    }

    /// Create a transfer error.
    #[must_use]
    pub fn transfer(path: impl Into<PathBuf>, attempt: u32, reason: impl Into<String>) -> Self {
        Self::Transfer {
            path: path.into(),
            attempt,
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error indicates exhausted storage.
    #[must_use]
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Self::StorageExhausted { .. })
    }

    /// Check if this error is a transfer failure.
    #[must_use]
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
