//! Error types for the coordinator protocol codec.

use thiserror::Error;

/// Errors that can occur during frame or request decode.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Channel {chan} out of range (max {max})")]
    ChannelOutOfRange { chan: u32, max: u32 },

    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: u64 },

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the connection can survive this error. Request-body errors
    /// are answered with an error envelope; frame-level errors kill the
    /// connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. }
                | ProtocolError::ChannelOutOfRange { .. }
                | ProtocolError::Io(_)
        )
    }
}
