//! Error types for the protocol crate.

use docsync_core::CoreError;
use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or moving frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to encode a message to CBOR.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes into a message.
    #[error("decoding failed: {message}")]
    Decode {
        /// Description of the decoding error.
        message: String,
    },

    /// A request named an event that does not exist.
    #[error("Unknown event ({0})")]
    UnknownEvent(String),

    /// A request was well-formed CBOR but not a valid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A frame exceeded the configured maximum length.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The other end of a frame channel is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Creates an encoding error.
    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns true if the transport is no longer usable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChannelClosed | ProtocolError::Io(_) | ProtocolError::FrameTooLarge { .. }
        )
    }
}

impl From<ProtocolError> for CoreError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownEvent(event) => CoreError::UnknownEvent(event),
            ProtocolError::InvalidRequest(message) => CoreError::InvalidPayload(message),
            ProtocolError::Encode { message } | ProtocolError::Decode { message } => {
                CoreError::InvalidPayload(message)
            }
            ProtocolError::Io(err) => CoreError::Io(err),
            other @ (ProtocolError::ChannelClosed | ProtocolError::FrameTooLarge { .. }) => {
                CoreError::Transport(other.to_string())
            }
        }
    }
}
