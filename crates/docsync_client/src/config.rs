//! Configuration for the remote backend.

use docsync_protocol::DEFAULT_MAX_FRAME_LEN;
use std::time::Duration;

/// Configuration for an [`crate::RpcBackend`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for a response. `None` waits until the transport
    /// closes.
    pub request_timeout: Option<Duration>,
    /// Maximum frame size accepted or sent over a stream transport.
    pub max_frame_len: usize,
}

impl ClientConfig {
    /// Creates a configuration without a request timeout.
    pub fn new() -> Self {
        Self {
            request_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the maximum frame size.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
