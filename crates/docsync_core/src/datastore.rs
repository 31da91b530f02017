//! Storage adapter boundary.
//!
//! A [`Datastore`] owns the authoritative value of every document. It
//! performs no authorization and publishes nothing; both are the caller's
//! job (see [`crate::MemoryBackend`] and the server connection).

use crate::error::CoreResult;
use crate::path::{CollectionPath, DocumentPath};
use crate::value::Document;
use async_trait::async_trait;
use uuid::Uuid;

/// Document storage without authorization.
///
/// Implementations must be safe to share between sessions. Each method
/// operates on a single document or collection and is atomic with respect
/// to other calls on the same store.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Returns the document at `path`, or `None` if absent.
    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>>;

    /// Returns the direct children of `path` as `(id, value)` pairs.
    ///
    /// Order is unspecified.
    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>>;

    /// Merges `patch` into the document at `path` and returns the stored
    /// value.
    async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document>;

    /// Stores `value` under a fresh id in `path` and returns the id.
    async fn add(&self, path: &CollectionPath, value: Document) -> CoreResult<String> {
        let id = generate_id();
        self.update(&path.document_path(id.as_str()), value).await?;
        Ok(id)
    }

    /// Deletes the document at `path`. Removing an absent document is not
    /// an error.
    async fn remove(&self, path: &DocumentPath) -> CoreResult<()>;
}

/// Generates a new random document id.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_segments() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(!a.contains('/'));
    }
}
