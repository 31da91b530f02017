//! Reference backend: rules + datastore + bus, all in process.

use crate::backend::{Backend, Callback, FileUpload, Subscription};
use crate::bus::{EventBus, Listener, Publication};
use crate::datastore::Datastore;
use crate::error::{CoreError, CoreResult};
use crate::memory::MemoryDatastore;
use crate::path::{CollectionPath, DocumentPath, Path};
use crate::rule::{AccessMode, Reader, Rule, RuleSet};
use crate::value::Document;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Prefix of download URLs returned by `file_url`.
pub const DEFAULT_DOWNLOAD_URL_PREFIX: &str = "/files";

/// Builds a download URL for file document `id`.
pub fn download_url(prefix: &str, id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), id)
}

/// [`Reader`] that reads straight from a datastore, bypassing rules.
#[derive(Clone)]
pub struct DatastoreReader {
    datastore: Arc<dyn Datastore>,
    user_id: Option<String>,
}

impl DatastoreReader {
    /// Creates a reader acting for `user_id`.
    pub fn new(datastore: Arc<dyn Datastore>, user_id: Option<String>) -> Self {
        Self { datastore, user_id }
    }
}

#[async_trait]
impl Reader for DatastoreReader {
    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>> {
        self.datastore.get(path).await
    }

    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>> {
        self.datastore.list(path).await
    }

    async fn user_id(&self) -> CoreResult<Option<String>> {
        Ok(self.user_id.clone())
    }
}

/// An in-process [`Backend`].
///
/// Backends built with [`MemoryBackend::with_parts`] from the same
/// datastore and bus observe each other's writes, which is how several
/// local users of one store are modelled.
pub struct MemoryBackend {
    datastore: Arc<dyn Datastore>,
    bus: EventBus,
    rules: RuleSet,
    user_id: Option<String>,
    download_url_prefix: String,
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Creates a backend over a fresh [`MemoryDatastore`] and bus.
    pub fn new(rules: &[Rule]) -> Self {
        Self::with_parts(
            Arc::new(MemoryDatastore::new()),
            EventBus::new(),
            RuleSet::compile(rules),
        )
    }

    /// Creates a backend over existing shared parts.
    pub fn with_parts(datastore: Arc<dyn Datastore>, bus: EventBus, rules: RuleSet) -> Self {
        Self {
            datastore,
            bus,
            rules,
            user_id: None,
            download_url_prefix: DEFAULT_DOWNLOAD_URL_PREFIX.to_string(),
            files: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sets the user id reported to rule predicates.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the prefix of download URLs.
    #[must_use]
    pub fn with_download_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_url_prefix = prefix.into();
        self
    }

    /// Returns the shared bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the shared datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Returns the stored bytes of file document `id`.
    pub fn file_data(&self, id: &str) -> Option<Vec<u8>> {
        self.files.read().get(id).cloned()
    }

    fn reader(&self) -> Arc<dyn Reader> {
        Arc::new(DatastoreReader::new(
            Arc::clone(&self.datastore),
            self.user_id.clone(),
        ))
    }

    async fn authorize(&self, path: Path, mode: AccessMode) -> CoreResult<()> {
        if let Path::Document(document) = &path {
            document.ensure_document()?;
        }
        path.validate()?;
        if self.rules.authorize(&path, mode, self.reader()).await? {
            Ok(())
        } else {
            debug!(path = %path, %mode, "request denied");
            Err(CoreError::forbidden(mode, path.encode()))
        }
    }

    fn relay(topic: String, callback: Callback) -> (String, Listener) {
        let listener: Listener = Arc::new(move |publication: &Publication| {
            callback(&publication.id, publication.value.as_ref());
        });
        (topic, listener)
    }

    fn subscription(&self, topic: String, listener: Listener) -> Subscription {
        let bus = self.bus.clone();
        let id = bus.on(topic.clone(), listener);
        Subscription::new(move || {
            async move {
                bus.off(&topic, id);
                Ok(())
            }
            .boxed()
        })
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: Callback,
    ) -> CoreResult<Subscription> {
        self.authorize(path.clone().into(), AccessMode::Read).await?;
        let id = path.id()?.to_string();

        let _sequence = self.bus.sequence().await;
        let current = self.datastore.get(path).await?;
        callback(&id, current.as_ref());

        let (topic, listener) = Self::relay(path.encode(), callback);
        Ok(self.subscription(topic, listener))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        callback: Callback,
    ) -> CoreResult<Subscription> {
        self.authorize(path.clone().into(), AccessMode::Read).await?;

        let _sequence = self.bus.sequence().await;
        for (id, value) in self.datastore.list(path).await? {
            callback(&id, Some(&value));
        }

        let (topic, listener) = Self::relay(path.encode(), callback);
        Ok(self.subscription(topic, listener))
    }

    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>> {
        self.authorize(path.clone().into(), AccessMode::Read).await?;
        self.datastore.get(path).await
    }

    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>> {
        self.authorize(path.clone().into(), AccessMode::Read).await?;
        self.datastore.list(path).await
    }

    async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document> {
        self.authorize(path.clone().into(), AccessMode::Write).await?;

        let _sequence = self.bus.sequence().await;
        let stored = self.datastore.update(path, patch).await?;
        self.bus.publish_change(path, Some(stored.clone()))?;
        Ok(stored)
    }

    async fn add(&self, path: &CollectionPath, value: Document) -> CoreResult<String> {
        self.authorize(path.clone().into(), AccessMode::Write).await?;

        let _sequence = self.bus.sequence().await;
        let id = self.datastore.add(path, value.clone()).await?;
        self.bus
            .publish_change(&path.document_path(id.as_str()), Some(value))?;
        Ok(id)
    }

    async fn remove(&self, path: &DocumentPath) -> CoreResult<()> {
        self.authorize(path.clone().into(), AccessMode::Write).await?;

        let _sequence = self.bus.sequence().await;
        self.datastore.remove(path).await?;
        self.bus.publish_change(path, None)
    }

    async fn add_file(&self, path: &CollectionPath, file: FileUpload) -> CoreResult<String> {
        self.authorize(path.clone().into(), AccessMode::Write).await?;

        let metadata = file.metadata();
        let _sequence = self.bus.sequence().await;
        let id = self.datastore.add(path, metadata.clone()).await?;
        self.files.write().insert(id.clone(), file.data);
        self.bus
            .publish_change(&path.document_path(id.as_str()), Some(metadata))?;
        Ok(id)
    }

    async fn delete_file(&self, path: &DocumentPath) -> CoreResult<()> {
        self.authorize(path.clone().into(), AccessMode::Write).await?;
        let id = path.id()?;

        let _sequence = self.bus.sequence().await;
        self.files.write().remove(id);
        self.datastore.remove(path).await?;
        self.bus.publish_change(path, None)
    }

    async fn file_url(&self, path: &DocumentPath) -> CoreResult<String> {
        self.authorize(path.clone().into(), AccessMode::Read).await?;
        Ok(download_url(&self.download_url_prefix, path.id()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    type Seen = Arc<Mutex<Vec<(String, Option<Value>)>>>;

    fn recorder() -> (Callback, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback = Arc::new(move |id: &str, value: Option<&Document>| {
            sink.lock()
                .push((id.to_string(), value.cloned().map(Value::Object)));
        });
        (callback, seen)
    }

    fn doc(value: Value) -> Document {
        crate::value::into_document(value).unwrap()
    }

    fn open() -> MemoryBackend {
        MemoryBackend::new(&[Rule::allow_all("/posts/:id")])
    }

    #[tokio::test]
    async fn tombstone_round_trip() {
        let backend = open();
        let path = DocumentPath::root("posts", "p1");
        backend.update(&path, doc(json!({"a": 1}))).await.unwrap();

        let (callback, seen) = recorder();
        let subscription = backend.subscribe_document(&path, callback).await.unwrap();
        backend.remove(&path).await.unwrap();

        assert_eq!(backend.get(&path).await.unwrap(), None);
        assert_eq!(
            *seen.lock(),
            vec![
                ("p1".to_string(), Some(json!({"a": 1}))),
                ("p1".to_string(), None),
            ]
        );
        subscription.unsubscribe().await.unwrap();
        assert_eq!(backend.bus().total_listeners(), 0);
    }

    #[tokio::test]
    async fn denied_operations_are_forbidden() {
        let backend = MemoryBackend::new(&[Rule::new("/posts/:id").read(true)]);
        let path = DocumentPath::root("posts", "p1");

        let err = backend.update(&path, doc(json!({"a": 1}))).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(backend
            .add(&CollectionPath::root("posts"), Document::new())
            .await
            .unwrap_err()
            .is_forbidden());
        assert!(backend
            .get(&DocumentPath::root("users", "u1"))
            .await
            .unwrap_err()
            .is_forbidden());
        assert_eq!(backend.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_path_fails_before_rules() {
        let backend = open();
        let err = backend.get(&DocumentPath::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::EmptyPath));
    }

    #[tokio::test]
    async fn invalid_segment_is_rejected() {
        let backend = open();
        let err = backend
            .get(&DocumentPath::root("posts", "a/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn collection_subscription_sees_initial_and_later_children() {
        let backend = open();
        let posts = CollectionPath::root("posts");
        backend
            .update(&posts.document_path("a"), doc(json!({"n": 1})))
            .await
            .unwrap();

        let (callback, seen) = recorder();
        let subscription = backend.subscribe_collection(&posts, callback).await.unwrap();
        let id = backend.add(&posts, doc(json!({"n": 2}))).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ("a".to_string(), Some(json!({"n": 1}))),
                (id, Some(json!({"n": 2}))),
            ]
        );

        subscription.unsubscribe().await.unwrap();
        backend
            .update(&posts.document_path("a"), doc(json!({"n": 3})))
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn shared_parts_observe_each_other() {
        let datastore: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let bus = EventBus::new();
        let rules = RuleSet::compile(&[Rule::allow_all("/posts/:id")]);
        let writer = MemoryBackend::with_parts(Arc::clone(&datastore), bus.clone(), rules.clone());
        let watcher = MemoryBackend::with_parts(datastore, bus, rules);

        let (callback, seen) = recorder();
        let path = DocumentPath::root("posts", "x");
        let _subscription = watcher.subscribe_document(&path, callback).await.unwrap();
        writer.update(&path, doc(json!({"v": true}))).await.unwrap();

        assert_eq!(seen.lock().last(), Some(&("x".to_string(), Some(json!({"v": true})))));
    }

    #[tokio::test]
    async fn predicate_sees_user_id() {
        let rules = [Rule::new("/users/:uid").read_if(|_path, params, reader| {
            let uid = params.get("uid").map(str::to_string);
            async move { Ok(reader.user_id().await? == uid) }
        })];
        let backend = MemoryBackend::new(&rules).with_user_id("alice");

        assert!(backend.get(&DocumentPath::root("users", "alice")).await.is_ok());
        assert!(backend
            .get(&DocumentPath::root("users", "bob"))
            .await
            .unwrap_err()
            .is_forbidden());
    }

    #[tokio::test]
    async fn file_lifecycle() {
        let backend = MemoryBackend::new(&[Rule::allow_all("/files/:id")]);
        let files = CollectionPath::root("files");

        let id = backend
            .add_file(&files, FileUpload::new("a.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap();
        let path = files.document_path(id.as_str());

        assert_eq!(
            backend.get(&path).await.unwrap(),
            Some(doc(json!({"name": "a.txt", "type": "text/plain"})))
        );
        assert_eq!(backend.file_data(&id), Some(b"hi".to_vec()));
        assert_eq!(backend.file_url(&path).await.unwrap(), format!("/files/{id}"));

        backend.delete_file(&path).await.unwrap();
        assert_eq!(backend.get(&path).await.unwrap(), None);
        assert_eq!(backend.file_data(&id), None);
    }

    #[test]
    fn download_url_joins_prefix() {
        assert_eq!(download_url("/files", "x"), "/files/x");
        assert_eq!(download_url("https://cdn/f/", "x"), "https://cdn/f/x");
    }
}
