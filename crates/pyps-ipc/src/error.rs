//! IPC Error types

use crate::ErrorCode;
use thiserror::Error;

/// Errors that can occur during IPC operations
#[derive(Debug, Error)]
pub enum IpcError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame size exceeded maximum
    #[error("Message too large (max 16MB)")]
    MessageTooLarge,

    /// Failed to deserialize message
    #[error("Deserialization failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    /// Failed to serialize message
    #[error("Serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    /// Request timed out
    #[error("Request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Daemon not running
    #[error("Daemon not running (socket not found)")]
    DaemonNotRunning,

    /// The daemon answered with an error
    #[error("{code:?}: {message}")]
    Remote { code: ErrorCode, message: String },

    /// The daemon answered with a payload of the wrong kind
    #[error("Unexpected response")]
    UnexpectedResponse,
}

impl IpcError {
    /// Error code sent by the daemon, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            IpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}
