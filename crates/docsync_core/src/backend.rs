//! The backend contract shared by the local and remote implementations.

use crate::error::CoreResult;
use crate::path::{CollectionPath, DocumentPath};
use crate::value::Document;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Snapshot callback: `(document id, value or None for a removal)`.
pub type Callback = Arc<dyn Fn(&str, Option<&Document>) + Send + Sync>;

/// Handle returned by a subscribe call.
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[must_use = "a subscription stays active until `unsubscribe` is called"]
pub struct Subscription {
    cancel: Box<dyn FnOnce() -> BoxFuture<'static, CoreResult<()>> + Send>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when unsubscribed.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, CoreResult<()>> + Send + 'static,
    {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Stops delivery to the subscribed callback.
    ///
    /// A snapshot that was already published may still arrive.
    pub async fn unsubscribe(self) -> CoreResult<()> {
        (self.cancel)().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// A file to attach to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Original file name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl FileUpload {
    /// Creates a file upload.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Returns the metadata document stored for this file.
    pub fn metadata(&self) -> Document {
        let mut document = Document::new();
        document.insert("name".into(), self.name.clone().into());
        document.insert("type".into(), self.content_type.clone().into());
        document
    }
}

/// Authorized document access with change subscriptions.
///
/// Every operation checks the backend's rules first and fails with
/// [`crate::CoreError::Forbidden`] on denial. Subscriptions deliver the
/// current state immediately, then one callback per later mutation of the
/// document (or of a direct child, for collections).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Subscribes to one document.
    async fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: Callback,
    ) -> CoreResult<Subscription>;

    /// Subscribes to every direct child of a collection.
    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        callback: Callback,
    ) -> CoreResult<Subscription>;

    /// Returns the document at `path`, or `None` if absent.
    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>>;

    /// Returns every document in a collection as `(id, value)` pairs.
    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>>;

    /// Merges `patch` into a document and returns the stored value.
    async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document>;

    /// Adds a document with a generated id and returns the id.
    async fn add(&self, path: &CollectionPath, value: Document) -> CoreResult<String>;

    /// Removes a document.
    async fn remove(&self, path: &DocumentPath) -> CoreResult<()>;

    /// Stores a file and a `{name, type}` document describing it; returns
    /// the document id.
    async fn add_file(&self, path: &CollectionPath, file: FileUpload) -> CoreResult<String>;

    /// Removes a file and its describing document.
    async fn delete_file(&self, path: &DocumentPath) -> CoreResult<()>;

    /// Returns the download URL of a stored file.
    async fn file_url(&self, path: &DocumentPath) -> CoreResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn unsubscribe_runs_cancel_once() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let subscription = Subscription::new(move || {
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        assert!(!cancelled.load(Ordering::SeqCst));
        subscription.unsubscribe().await.unwrap();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn file_metadata_has_name_and_type() {
        let file = FileUpload::new("a.txt", "text/plain", b"hello".to_vec());
        let metadata = file.metadata();
        assert_eq!(metadata.get("name").and_then(|v| v.as_str()), Some("a.txt"));
        assert_eq!(
            metadata.get("type").and_then(|v| v.as_str()),
            Some("text/plain")
        );
        assert_eq!(metadata.len(), 2);
    }
}
