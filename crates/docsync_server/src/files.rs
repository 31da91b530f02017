//! On-disk store for uploaded files.
//!
//! Each file is stored as `<files_dir>/<document id>`; the describing
//! `{name, type}` document lives in the datastore.

use docsync_core::download_url;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory-backed file store.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    url_prefix: String,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// write.
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into(),
        }
    }

    /// Returns the root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, id: &str) -> io::Result<PathBuf> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file id '{id}'"),
            ));
        }
        Ok(self.dir.join(id))
    }

    /// Writes the contents of file `id`.
    pub async fn write(&self, id: &str, data: &[u8]) -> io::Result<()> {
        let path = self.file_path(id)?;
        fs::create_dir_all(&self.dir).await?;
        fs::write(path, data).await
    }

    /// Reads the contents of file `id`, or `None` if it does not exist.
    pub async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(id)?).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Deletes file `id`. A missing file is not an error.
    pub async fn delete(&self, id: &str) -> io::Result<()> {
        match fs::remove_file(self.file_path(id)?).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Returns the download URL of file `id`.
    pub fn url(&self, id: &str) -> String {
        download_url(&self.url_prefix, id)
    }
}
