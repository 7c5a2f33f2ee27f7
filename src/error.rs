//! Error types for the hq library
//!
//! Errors in this module describe conditions that abort an operation. Per-file
//! problems found while verifying a tree are not errors: they are classified
//! into [`FailureRecord`](crate::types::FailureRecord)s and the batch keeps going.
//!
//! Two families matter to callers:
//!
//! - **Fatal I/O**: the root directory cannot be read, the map or container
//!   cannot be written, or data cannot be synced to storage.
//! - **Fatal format**: a container has the wrong marker, an unparsable
//!   timestamp, or a broken base64 blob.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the hq library
pub type Result<T> = std::result::Result<T, HqError>;

/// Main error type for all hq operations
#[derive(Debug, Error)]
pub enum HqError {
    /// I/O errors that were not attributed to a specific path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure that aborts the whole operation
    #[error("fatal IO error on {path:?}: {source}")]
    FatalIo {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Structurally invalid container or pipe input
    #[error("defective .hqs/.hqx container: {0}")]
    FatalFormat(String),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The decompressed map stops in the middle of a record
    #[error("input map is corrupt at byte {offset} [last valid: {last_valid}]")]
    MapCorrupt {
        /// Path of the last record that parsed completely
        last_valid: String,
        /// Byte offset in the decompressed buffer where parsing stopped
        offset: usize,
    },

    /// No map matching the requested timestamp was found
    #[error("unable to find a .hqMAP in {dir:?} [{pattern}]")]
    MapNotFound {
        /// Directory that was searched
        dir: PathBuf,
        /// Name prefix that was searched for
        pattern: String,
    },

    /// Public key for the requested tag is missing from the keystore
    #[error("no public key for identity {0} in keystore")]
    KeyNotFound(String),

    /// The stored key does not reproduce the tag it is filed under
    #[error("key integrity problem, tag checksum mismatch (expected {expected}, derived {derived})")]
    KeyIntegrity {
        /// Tag the key was looked up by
        expected: String,
        /// Tag derived from the stored owner and key
        derived: String,
    },

    /// Owner identifier rejected
    #[error("invalid owner id: {0}")]
    InvalidOwner(String),

    /// Malformed identity tag
    #[error("invalid identity tag: {0}")]
    InvalidTag(String),

    /// Signing backend failure (bad key material, wrong lengths)
    #[error("signature error: {0}")]
    Signature(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HqError {
    /// Wrap an I/O error as fatal for `path`
    pub fn fatal_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HqError::FatalIo {
            path: path.into(),
            source,
        }
    }

    /// Create a fatal format error with a custom message
    pub fn fatal_format(msg: impl Into<String>) -> Self {
        HqError::FatalFormat(msg.into())
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        HqError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        HqError::Decompression(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        HqError::Internal(msg.into())
    }

    /// Check if this error is a fatal I/O condition
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, HqError::FatalIo { .. } | HqError::Io(_))
    }

    /// Check if this error is a structural format problem
    pub fn is_fatal_format(&self) -> bool {
        matches!(self, HqError::FatalFormat(_))
    }

    /// Check if this error indicates corruption of persisted data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            HqError::MapCorrupt { .. }
                | HqError::FatalFormat(_)
                | HqError::KeyIntegrity { .. }
                | HqError::Decompression(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            HqError::MapNotFound { dir, .. } => {
                format!("No .hqMAP found in {:?}. Sign the directory first with 'hq sign'.", dir)
            }
            HqError::KeyNotFound(tag) => {
                format!("No public key for '{}'. Generate an identity with 'hq generate' or import the key.", tag)
            }
            HqError::InvalidOwner(reason) => {
                format!("{}. Owner ids need 6 to 64 characters and must not contain '='.", reason)
            }
            _ => self.to_string(),
        }
    }
}
