//! Error types for token storage.

use thiserror::Error;

/// Errors that can occur while reading or writing stored OAuth state.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Failed to read or write the token file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize stored records.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Could not determine the data directory.
    #[error("Could not determine data directory")]
    NoDataDir,

    /// Failed to set file permissions.
    #[error("Failed to set file permissions: {0}")]
    Permissions(String),
}

/// Result type for storage operations.
pub type AuthResult<T> = Result<T, AuthError>;
