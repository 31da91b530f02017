//! Error types for the docsync server.

use docsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while running the server.
///
/// Failures of individual requests never surface here; they are answered
/// with an error response on the connection that sent them.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The connection limit was reached.
    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    /// A message could not be encoded or framed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
