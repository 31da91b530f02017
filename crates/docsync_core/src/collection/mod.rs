//! Application-facing collection and document handles.
//!
//! The facade wraps any [`Backend`]. A [`Collection`] can list and add
//! documents, and while subscribed it keeps a local list of documents in
//! sync: new documents go to the front, changed documents are replaced in
//! place, removed documents are dropped.
//!
//! ```rust,ignore
//! let posts = Collection::root(backend, "posts");
//! let subscription = posts.subscribe().await?;
//! posts.add(value).await?;
//! for post in posts.documents() {
//!     println!("{}: {:?}", post.id(), post.value()?);
//! }
//! subscription.unsubscribe().await?;
//! ```

mod document;
mod typed;

pub use document::DocumentRef;
pub use typed::{Attribute, Model, Schema, TypedCollection};

use crate::backend::{Backend, Callback, FileUpload, Subscription};
use crate::error::CoreResult;
use crate::path::CollectionPath;
use crate::value::Document;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A collection of documents reachable through a backend.
#[derive(Clone)]
pub struct Collection {
    backend: Arc<dyn Backend>,
    path: CollectionPath,
    documents: Arc<RwLock<Vec<DocumentRef>>>,
}

impl Collection {
    /// Creates a handle to a root-level collection.
    pub fn root(backend: Arc<dyn Backend>, name: impl Into<String>) -> Self {
        Self::at(backend, CollectionPath::root(name))
    }

    /// Creates a handle to sub-collection `name` of `parent`.
    pub fn child_of(parent: &DocumentRef, name: impl Into<String>) -> Self {
        Self::at(
            Arc::clone(parent.backend()),
            CollectionPath::new(parent.path(), name),
        )
    }

    /// Creates a handle to the collection at `path`.
    pub fn at(backend: Arc<dyn Backend>, path: CollectionPath) -> Self {
        Self {
            backend,
            path,
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.path.collection
    }

    /// Returns the collection path.
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Returns a handle to document `id` without fetching it.
    pub fn doc(&self, id: impl Into<String>) -> DocumentRef {
        DocumentRef::new(Arc::clone(&self.backend), self.path.clone(), id, None)
    }

    /// Fetches every document in the collection.
    pub async fn list(&self) -> CoreResult<Vec<DocumentRef>> {
        let entries = self.backend.list(&self.path).await?;
        Ok(entries
            .into_iter()
            .map(|(id, value)| self.document(id, Some(value)))
            .collect())
    }

    /// Adds a document and returns a handle holding `value`.
    pub async fn add(&self, value: Document) -> CoreResult<DocumentRef> {
        let id = self.backend.add(&self.path, value.clone()).await?;
        Ok(self.document(id, Some(value)))
    }

    /// Stores a file and returns the handle of its describing document.
    pub async fn add_file(&self, file: FileUpload) -> CoreResult<DocumentRef> {
        let metadata = file.metadata();
        let id = self.backend.add_file(&self.path, file).await?;
        Ok(self.document(id, Some(metadata)))
    }

    /// Returns the documents observed by the current subscription.
    pub fn documents(&self) -> Vec<DocumentRef> {
        self.documents.read().clone()
    }

    /// Starts keeping [`Collection::documents`] in sync.
    ///
    /// The local list is cleared first, then filled by the initial
    /// snapshot.
    pub async fn subscribe(&self) -> CoreResult<Subscription> {
        self.documents.write().clear();

        let documents = Arc::clone(&self.documents);
        let backend = Arc::clone(&self.backend);
        let path = self.path.clone();
        let callback: Callback = Arc::new(move |id: &str, value: Option<&Document>| {
            let mut documents = documents.write();
            match value {
                None => documents.retain(|document| document.id() != id),
                Some(value) => {
                    let fresh = DocumentRef::new(
                        Arc::clone(&backend),
                        path.clone(),
                        id,
                        Some(value.clone()),
                    );
                    match documents.iter_mut().find(|document| document.id() == id) {
                        Some(slot) => *slot = fresh,
                        None => documents.insert(0, fresh),
                    }
                }
            }
        });
        self.backend.subscribe_collection(&self.path, callback).await
    }

    fn document(&self, id: String, value: Option<Document>) -> DocumentRef {
        DocumentRef::new(Arc::clone(&self.backend), self.path.clone(), id, value)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path.encode())
            .field("documents", &self.documents.read().len())
            .finish()
    }
}
