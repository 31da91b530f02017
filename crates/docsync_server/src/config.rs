//! Server configuration.

use docsync_core::DEFAULT_DOWNLOAD_URL_PREFIX;
use docsync_protocol::DEFAULT_MAX_FRAME_LEN;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the docsync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Directory holding uploaded files.
    pub files_dir: PathBuf,
    /// Prefix of file download URLs.
    pub download_url_prefix: String,
    /// Maximum size of one frame in bytes.
    pub max_frame_len: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            files_dir: std::env::temp_dir().join("docsync-files"),
            download_url_prefix: DEFAULT_DOWNLOAD_URL_PREFIX.to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the directory holding uploaded files.
    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    /// Sets the prefix of file download URLs.
    pub fn with_download_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_url_prefix = prefix.into();
        self
    }

    /// Sets the maximum frame size.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.download_url_prefix, "/files");
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_connections(2)
            .with_files_dir("/srv/files")
            .with_download_url_prefix("https://cdn.example/f")
            .with_max_frame_len(1024);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.files_dir, PathBuf::from("/srv/files"));
        assert_eq!(config.download_url_prefix, "https://cdn.example/f");
        assert_eq!(config.max_frame_len, 1024);
    }
}
