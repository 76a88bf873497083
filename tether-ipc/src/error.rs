//! IPC error types

use thiserror::Error;

/// Errors raised while exchanging messages with the runtime
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// The underlying stream failed
    #[error("IO error: {0}")]
    IoError(String),

    /// End of stream, or the writer was already closed
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// A line that is not valid UTF-8
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl IpcError {
    /// Whether only the current message is lost and the stream is still usable
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            IpcError::DeserializationError(_)
                | IpcError::InvalidMessage(_)
                | IpcError::ProtocolVersionMismatch { .. }
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else {
            IpcError::DeserializationError(err.to_string())
        }
    }
}
