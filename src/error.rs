//! Error types for the Tresor library
//!
//! Every engine operation returns [`Result<T>`]. The named kinds
//! (`InvalidUid`, `NoVolumesDefined`, `InvalidVolumeName`,
//! `VolumePathNotFound`, `ObjectAlreadyExists`, `ObjectNotFound`) are the
//! conditions callers are expected to match on; everything else is an
//! underlying I/O, archive or collaborator failure surfaced unchanged.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Tresor library
pub type Result<T> = std::result::Result<T, TresorError>;

/// Main error type for all Tresor operations
#[derive(Debug, Error)]
pub enum TresorError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors while reading a zip tier archive
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Malformed UID string
    #[error("Invalid uid: {0}")]
    InvalidUid(String),

    /// Store without any registered volume
    #[error("No volumes defined")]
    NoVolumesDefined,

    /// Unknown or reserved volume name
    #[error("Volume name not allowed: {0}")]
    InvalidVolumeName(String),

    /// Volume root does not exist at registration time
    #[error("Volume {volume} path not found: {path:?}")]
    VolumePathNotFound {
        /// Volume name
        volume: String,
        /// Configured root path
        path: PathBuf,
    },

    /// Store target already has content
    #[error("Object already exists: volume {volume}, uid {uid}")]
    ObjectAlreadyExists {
        /// Volume holding the object
        volume: String,
        /// Canonical uid of the object
        uid: String,
    },

    /// Object could not be resolved on any volume
    #[error("Object not found: volume {volume}, uid {uid}")]
    ObjectNotFound {
        /// Volume searched, `??` when every volume was searched
        volume: String,
        /// Canonical uid of the object
        uid: String,
    },

    /// Content indexer failure
    #[error("Index error: {0}")]
    Index(String),

    /// Metadata database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Thread pool error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TresorError {
    /// Create an object-not-found error for a uid searched on every volume
    pub fn not_found(uid: impl Into<String>) -> Self {
        TresorError::ObjectNotFound {
            volume: "??".to_string(),
            uid: uid.into(),
        }
    }

    /// Create an index error with a custom message
    pub fn index(msg: impl Into<String>) -> Self {
        TresorError::Index(msg.into())
    }

    /// Create a database error with a custom message
    pub fn database(msg: impl Into<String>) -> Self {
        TresorError::Database(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        TresorError::Internal(msg.into())
    }

    /// Check if this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, TresorError::ObjectNotFound { .. })
    }

    /// Check if retrying the operation can succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TresorError::ObjectAlreadyExists { .. }
                | TresorError::ObjectNotFound { .. }
                | TresorError::Index(_)
                | TresorError::Database(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            TresorError::NoVolumesDefined => {
                "No volumes are configured. Add at least one volume to the storage configuration.".to_string()
            }
            TresorError::VolumePathNotFound { volume, path } => {
                format!("Volume '{}' points to {:?}, which does not exist. Create the directory first.", volume, path)
            }
            TresorError::InvalidVolumeName(name) => {
                format!("Volume '{}' is unknown or reserved. Use one of the configured volume names.", name)
            }
            TresorError::ObjectAlreadyExists { uid, .. } => {
                format!("Object '{}' already has content. Store a new version instead (version 0).", uid)
            }
            _ => self.to_string(),
        }
    }
}
