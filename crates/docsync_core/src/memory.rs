//! In-memory datastore.

use crate::datastore::Datastore;
use crate::error::CoreResult;
use crate::path::{CollectionPath, DocumentPath, SEPARATOR};
use crate::value::{self, Document};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A datastore holding every document in an ordered map keyed by encoded
/// path.
///
/// Suitable for tests and for servers that do not need persistence. All
/// work happens synchronously under one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl MemoryDatastore {
    /// Creates an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Removes every document.
    pub fn clear(&self) {
        self.documents.write().clear();
    }
}

fn key_of(path: &DocumentPath) -> CoreResult<String> {
    path.ensure_document()?;
    Ok(path.encode())
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>> {
        let key = key_of(path)?;
        Ok(self.documents.read().get(&key).cloned())
    }

    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>> {
        let mut prefix = path.encode();
        prefix.push(SEPARATOR);

        let documents = self.documents.read();
        let children = documents
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, value)| {
                let id = &key[prefix.len()..];
                if id.is_empty() || id.contains(SEPARATOR) {
                    None
                } else {
                    Some((id.to_string(), value.clone()))
                }
            })
            .collect();
        Ok(children)
    }

    async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document> {
        let key = key_of(path)?;
        let mut documents = self.documents.write();
        let stored = value::merged(documents.remove(&key), patch);
        documents.insert(key, stored.clone());
        Ok(stored)
    }

    async fn remove(&self, path: &DocumentPath) -> CoreResult<()> {
        let key = key_of(path)?;
        self.documents.write().remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value::into_document(value).unwrap()
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryDatastore::new();
        let path = DocumentPath::root("posts", "nope");
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_merges_and_returns_stored_value() {
        let store = MemoryDatastore::new();
        let path = DocumentPath::root("posts", "a");

        let first = store.update(&path, doc(json!({"a": {"x": 1}}))).await.unwrap();
        assert_eq!(Value::Object(first), json!({"a": {"x": 1}}));

        let second = store.update(&path, doc(json!({"a": {"y": 2}}))).await.unwrap();
        assert_eq!(Value::Object(second.clone()), json!({"a": {"x": 1, "y": 2}}));
        assert_eq!(store.get(&path).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn add_then_get() {
        let store = MemoryDatastore::new();
        let posts = CollectionPath::root("posts");
        let id = store.add(&posts, doc(json!({"title": "t"}))).await.unwrap();

        let stored = store.get(&posts.document_path(id.as_str())).await.unwrap();
        assert_eq!(stored, Some(doc(json!({"title": "t"}))));
    }

    #[tokio::test]
    async fn list_returns_direct_children_only() {
        let store = MemoryDatastore::new();
        let a = DocumentPath::root("posts", "a");
        store.update(&a, doc(json!({"n": 1}))).await.unwrap();
        store
            .update(&DocumentPath::root("posts", "b"), doc(json!({"n": 2})))
            .await
            .unwrap();
        store
            .update(&a.child("comments", "c1"), doc(json!({"n": 3})))
            .await
            .unwrap();
        store
            .update(&DocumentPath::root("postscript", "z"), doc(json!({"n": 4})))
            .await
            .unwrap();

        let mut ids: Vec<String> = store
            .list(&CollectionPath::root("posts"))
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        let comments = store.list(&a.collection("comments")).await.unwrap();
        assert_eq!(comments, vec![("c1".to_string(), doc(json!({"n": 3})))]);
    }

    #[tokio::test]
    async fn remove_deletes() {
        let store = MemoryDatastore::new();
        let path = DocumentPath::root("posts", "a");
        store.update(&path, doc(json!({"n": 1}))).await.unwrap();
        store.remove(&path).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);
        assert!(store.is_empty());

        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn empty_path_fails() {
        let store = MemoryDatastore::new();
        let empty = DocumentPath::default();
        assert!(matches!(store.get(&empty).await, Err(CoreError::EmptyPath)));
        assert!(matches!(
            store.update(&empty, Document::new()).await,
            Err(CoreError::EmptyPath)
        ));
        assert!(matches!(store.remove(&empty).await, Err(CoreError::EmptyPath)));
    }
}
