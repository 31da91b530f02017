//! Handle to a single document.

use crate::backend::{Backend, Callback, Subscription};
use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::path::{CollectionPath, DocumentPath};
use crate::value::Document;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A document in a [`Collection`], with its last known value.
///
/// Clones share the cached value, so a clone held by application code sees
/// the updates delivered to a subscription started on another clone.
#[derive(Clone)]
pub struct DocumentRef {
    backend: Arc<dyn Backend>,
    collection: CollectionPath,
    id: String,
    value: Arc<RwLock<Option<Document>>>,
}

impl DocumentRef {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        collection: CollectionPath,
        id: impl Into<String>,
        value: Option<Document>,
    ) -> Self {
        Self {
            backend,
            collection,
            id: id.into(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Returns the document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the document's path.
    pub fn path(&self) -> DocumentPath {
        self.collection.document_path(self.id.as_str())
    }

    /// Returns the sub-collection `name` of this document.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::child_of(self, name)
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Returns the last known value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentRemoved`] if the document is known to
    /// be absent.
    pub fn value(&self) -> CoreResult<Document> {
        self.value.read().clone().ok_or(CoreError::DocumentRemoved)
    }

    /// Returns true if a value is cached.
    pub fn exists(&self) -> bool {
        self.value.read().is_some()
    }

    /// Fetches the current value from the backend and caches it.
    pub async fn refresh(&self) -> CoreResult<Option<Document>> {
        let current = self.backend.get(&self.path()).await?;
        *self.value.write() = current.clone();
        Ok(current)
    }

    /// Merges `patch` into the document.
    pub async fn update(&self, patch: Document) -> CoreResult<Document> {
        self.backend.update(&self.path(), patch).await
    }

    /// Removes the document.
    pub async fn remove(&self) -> CoreResult<()> {
        self.backend.remove(&self.path()).await
    }

    /// Keeps the cached value in sync until unsubscribed.
    pub async fn subscribe(&self) -> CoreResult<Subscription> {
        let cache = Arc::clone(&self.value);
        let callback: Callback = Arc::new(move |_id: &str, value: Option<&Document>| {
            *cache.write() = value.cloned();
        });
        self.backend.subscribe_document(&self.path(), callback).await
    }

    /// Deletes the file described by this document.
    pub async fn delete_file(&self) -> CoreResult<()> {
        self.backend.delete_file(&self.path()).await
    }

    /// Returns the download URL of the file described by this document.
    pub async fn file_url(&self) -> CoreResult<String> {
        self.backend.file_url(&self.path()).await
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRef")
            .field("path", &self.path().encode())
            .field("value", &*self.value.read())
            .finish()
    }
}
