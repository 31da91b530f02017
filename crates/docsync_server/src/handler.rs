//! Request handlers for data and file operations.

use crate::config::ServerConfig;
use crate::files::FileStore;
use docsync_core::{
    AccessMode, CollectionPath, CoreError, CoreResult, Datastore, DatastoreReader, Document,
    DocumentPath, EventBus, FileUpload, Path, Reader, RuleSet,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// State shared by every connection of a server.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Compiled rules.
    pub rules: RuleSet,
    /// Authoritative document store.
    pub datastore: Arc<dyn Datastore>,
    /// Bus on which every mutation is published.
    pub bus: EventBus,
    /// Uploaded file storage.
    pub files: FileStore,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        rules: RuleSet,
        datastore: Arc<dyn Datastore>,
        bus: EventBus,
    ) -> Self {
        let files = FileStore::new(config.files_dir.clone(), config.download_url_prefix.clone());
        Self {
            config,
            rules,
            datastore,
            bus,
            files,
        }
    }
}

/// Authorizes and executes requests on behalf of one user.
///
/// Every operation validates the path and checks the rules before touching
/// the datastore. Mutations are published on the bus while holding its
/// sequence, so subscribers see them in write order.
#[derive(Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
    user_id: String,
}

impl RequestHandler {
    /// Creates a handler acting for `user_id`.
    pub fn new(context: Arc<HandlerContext>, user_id: impl Into<String>) -> Self {
        Self {
            context,
            user_id: user_id.into(),
        }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    fn reader(&self) -> Arc<dyn Reader> {
        Arc::new(DatastoreReader::new(
            Arc::clone(&self.context.datastore),
            Some(self.user_id.clone()),
        ))
    }

    /// Fails unless `mode` access to `path` is allowed.
    pub async fn authorize(&self, path: &Path, mode: AccessMode) -> CoreResult<()> {
        if let Path::Document(document) = path {
            document.ensure_document()?;
        }
        path.validate()?;

        if self.context.rules.authorize(path, mode, self.reader()).await? {
            Ok(())
        } else {
            debug!(user = %self.user_id, path = %path, %mode, "request denied");
            Err(CoreError::forbidden(mode, path.encode()))
        }
    }

    /// Handles a get request.
    pub async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>> {
        self.authorize(&path.clone().into(), AccessMode::Read).await?;
        self.context.datastore.get(path).await
    }

    /// Handles a list request.
    pub async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>> {
        self.authorize(&path.clone().into(), AccessMode::Read).await?;
        self.context.datastore.list(path).await
    }

    /// Handles an update request, returning the stored value.
    pub async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document> {
        self.authorize(&path.clone().into(), AccessMode::Write).await?;

        let _sequence = self.context.bus.sequence().await;
        let stored = self.context.datastore.update(path, patch).await?;
        self.context.bus.publish_change(path, Some(stored.clone()))?;
        Ok(stored)
    }

    /// Handles an add request, returning the new id.
    pub async fn add(&self, path: &CollectionPath, value: Document) -> CoreResult<String> {
        self.authorize(&path.clone().into(), AccessMode::Write).await?;
        self.insert(path, value).await
    }

    async fn insert(&self, path: &CollectionPath, value: Document) -> CoreResult<String> {
        let _sequence = self.context.bus.sequence().await;
        let id = self.context.datastore.add(path, value.clone()).await?;
        self.context
            .bus
            .publish_change(&path.document_path(id.as_str()), Some(value))?;
        Ok(id)
    }

    /// Handles a remove request.
    pub async fn remove(&self, path: &DocumentPath) -> CoreResult<()> {
        self.authorize(&path.clone().into(), AccessMode::Write).await?;
        self.delete(path).await
    }

    async fn delete(&self, path: &DocumentPath) -> CoreResult<()> {
        let _sequence = self.context.bus.sequence().await;
        self.context.datastore.remove(path).await?;
        self.context.bus.publish_change(path, None)
    }

    /// Handles a file upload, returning the id of the describing document.
    ///
    /// If the bytes cannot be stored the describing document is removed
    /// again.
    pub async fn add_file(&self, path: &CollectionPath, file: FileUpload) -> CoreResult<String> {
        self.authorize(&path.clone().into(), AccessMode::Write).await?;
        let id = self.insert(path, file.metadata()).await?;
        if let Err(err) = self.context.files.write(&id, &file.data).await {
            warn!(%id, error = %err, "failed to store file");
            if let Err(cleanup) = self.delete(&path.document_path(id.as_str())).await {
                warn!(%id, error = %cleanup, "failed to remove file document");
            }
            return Err(err.into());
        }
        Ok(id)
    }

    /// Handles a file deletion.
    pub async fn delete_file(&self, path: &DocumentPath) -> CoreResult<()> {
        self.authorize(&path.clone().into(), AccessMode::Write).await?;
        self.delete(path).await?;
        self.context.files.delete(path.id()?).await?;
        Ok(())
    }

    /// Handles a download URL request.
    pub async fn download_url(&self, path: &DocumentPath) -> CoreResult<String> {
        self.authorize(&path.clone().into(), AccessMode::Read).await?;
        Ok(self.context.files.url(path.id()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::{value::into_document, MemoryDatastore, Rule};
    use serde_json::json;
    use tempfile::TempDir;

    fn create_handler(rules: &[Rule], files: &TempDir) -> RequestHandler {
        let config = ServerConfig::default().with_files_dir(files.path());
        let context = Arc::new(HandlerContext::new(
            config,
            RuleSet::compile(rules),
            Arc::new(MemoryDatastore::new()),
            EventBus::new(),
        ));
        RequestHandler::new(context, "session-1")
    }

    fn doc(value: serde_json::Value) -> Document {
        into_document(value).unwrap()
    }

    #[tokio::test]
    async fn end_to_end_posts_scenario() {
        let files = TempDir::new().unwrap();
        let handler = create_handler(&[Rule::allow_all("/posts/:id")], &files);
        let posts = CollectionPath::root("posts");

        let id = handler.add(&posts, doc(json!({"title": "a"}))).await.unwrap();
        assert_eq!(
            handler.list(&posts).await.unwrap(),
            vec![(id.clone(), doc(json!({"title": "a"})))]
        );

        let path = posts.document_path(id.as_str());
        let stored = handler.update(&path, doc(json!({"tags": ["x"]}))).await.unwrap();
        assert_eq!(stored, doc(json!({"title": "a", "tags": ["x"]})));
        assert_eq!(handler.get(&path).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn conditional_write_rule() {
        let files = TempDir::new().unwrap();
        let rules = [
            Rule::new("/c/:id").read(true).write_if(|_path, params, reader| {
                let id = params.get("id").unwrap_or_default().to_string();
                async move {
                    let gate = reader.get(&DocumentPath::root("d", id)).await?;
                    Ok(gate
                        .and_then(|d| d.get("writable").and_then(|v| v.as_bool()))
                        .unwrap_or(false))
                }
            }),
            Rule::allow_all("/d/:id"),
        ];
        let handler = create_handler(&rules, &files);
        let target = DocumentPath::root("c", "1");

        let gate = DocumentPath::root("d", "1");

        let err = handler.update(&target, doc(json!({"v": 1}))).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(handler.remove(&target).await.unwrap_err().is_forbidden());

        handler.update(&gate, doc(json!({"writable": true}))).await.unwrap();
        handler.update(&target, doc(json!({"v": 1}))).await.unwrap();
        handler.remove(&target).await.unwrap();
        handler.update(&target, doc(json!({"v": 2}))).await.unwrap();

        handler.update(&gate, doc(json!({"writable": false}))).await.unwrap();
        let err = handler.update(&target, doc(json!({"v": 3}))).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(handler.remove(&target).await.unwrap_err().is_forbidden());
        assert_eq!(handler.get(&target).await.unwrap(), Some(doc(json!({"v": 2}))));
    }

    #[tokio::test]
    async fn predicate_sees_session_as_user() {
        let files = TempDir::new().unwrap();
        let rules = [Rule::new("/me/:id").read_if(|_path, params, reader| {
            let id = params.get("id").map(str::to_string);
            async move { Ok(reader.user_id().await? == id) }
        })];
        let handler = create_handler(&rules, &files);

        assert!(handler.get(&DocumentPath::root("me", "session-1")).await.is_ok());
        assert!(handler
            .get(&DocumentPath::root("me", "other"))
            .await
            .unwrap_err()
            .is_forbidden());
    }

    #[tokio::test]
    async fn files_round_trip() {
        let files = TempDir::new().unwrap();
        let handler = create_handler(&[Rule::allow_all("/files/:id")], &files);
        let collection = CollectionPath::root("files");

        let id = handler
            .add_file(&collection, FileUpload::new("a.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap();
        let path = collection.document_path(id.as_str());

        assert_eq!(
            handler.get(&path).await.unwrap(),
            Some(doc(json!({"name": "a.txt", "type": "text/plain"})))
        );
        assert_eq!(
            handler.context().files.read(&id).await.unwrap(),
            Some(b"hi".to_vec())
        );
        assert_eq!(handler.download_url(&path).await.unwrap(), format!("/files/{id}"));

        handler.delete_file(&path).await.unwrap();
        assert_eq!(handler.get(&path).await.unwrap(), None);
        assert_eq!(handler.context().files.read(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_file_write_leaves_no_document() {
        let files = TempDir::new().unwrap();
        let blocker = files.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default().with_files_dir(blocker.join("files")),
            RuleSet::compile(&[Rule::allow_all("/files/:id")]),
            Arc::new(MemoryDatastore::new()),
            EventBus::new(),
        ));
        let handler = RequestHandler::new(context, "session-1");
        let collection = CollectionPath::root("files");

        let err = handler
            .add_file(&collection, FileUpload::new("a.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Io(_)), "unexpected error {err:?}");
        assert!(handler.list(&collection).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_file_requires_write() {
        let files = TempDir::new().unwrap();
        let handler = create_handler(&[Rule::new("/files/:id").read(true)], &files);
        let err = handler
            .delete_file(&DocumentPath::root("files", "x"))
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }
}
