//! MCP error types.

use serde_json::Value;
use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur while talking to an MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// An operation needed a live session and there was none.
    #[error("Not connected")]
    NotConnected,

    /// The transport failed to open, send, or stay open.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The initialize exchange did not complete.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server answered with a JSON-RPC error.
    #[error("MCP error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The server answered with a result of the wrong shape.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// No response arrived in time.
    #[error("Request timed out")]
    Timeout,

    /// The session ended before the request settled.
    #[error("Session closed")]
    SessionClosed,

    /// A later connect or a disconnect superseded this connect.
    #[error("Connect cancelled")]
    Cancelled,

    /// The server requires authorization.
    #[error("Authentication required")]
    AuthRequired,

    /// Authorization was attempted and failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No pending server request carries this id.
    #[error("No pending request with id {0}")]
    PendingNotFound(u64),

    /// Connection or schema configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token storage error.
    #[error("Token storage error: {0}")]
    Storage(#[from] inspector_auth::AuthError),
}

impl McpError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn handshake_failed(message: impl Into<String>) -> Self {
        Self::HandshakeFailed(message.into())
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Errors after which the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HandshakeFailed(_))
    }

    /// JSON-RPC error code, when the server supplied one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}
