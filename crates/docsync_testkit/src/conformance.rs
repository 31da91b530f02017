//! Behavioral checks shared by every [`Backend`] implementation.
//!
//! The same suite runs against the in-memory backend and against the
//! remote backend talking to a server, so both are held to one contract.
//! Every check panics on a violation.

use crate::fixtures::{doc, RecordingCallback};
use docsync_core::{
    Backend, Collection, CollectionPath, CoreError, DocumentPath, FileUpload, Rule,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rules covering every path the suite touches: full access below
/// `collection`, read-only access to `read_only`.
pub fn suite_rules(collection: &str, read_only: &str) -> Vec<Rule> {
    let mut rules: Vec<Rule> = [
        "",
        "/items/:item",
        "/children/:child",
        "/children/:child/deeper/:x",
        "/files/:file",
        "/posts/:post",
    ]
    .iter()
    .map(|suffix| Rule::allow_all(format!("/{collection}/:id{suffix}")))
    .collect();
    rules.push(Rule::new(format!("/{read_only}/:id")).read(true));
    rules
}

/// Runs every check against `backend`.
///
/// The backend must enforce [`suite_rules`] for the same two collection
/// names.
pub async fn run_backend_suite(backend: Arc<dyn Backend>, collection: &str, read_only: &str) {
    check_add_get_list(backend.as_ref(), collection).await;
    check_update_merges(backend.as_ref(), collection).await;
    check_tombstone_round_trip(backend.as_ref(), collection).await;
    check_collection_subscription(backend.as_ref(), collection).await;
    check_refcounted_subscribers(backend.as_ref(), collection).await;
    check_empty_path(backend.as_ref()).await;
    check_files(backend.as_ref(), collection).await;
    check_forbidden(backend.as_ref(), read_only).await;
    check_collection_facade(backend, collection).await;
}

/// `add` returns a fresh id whose document `get` and `list` both see.
pub async fn check_add_get_list(backend: &dyn Backend, collection: &str) {
    let path = CollectionPath::root(collection).document_path("seed").collection("items");

    let first = backend.add(&path, doc(json!({"title": "a"}))).await.unwrap();
    let second = backend.add(&path, doc(json!({"title": "b"}))).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(first.len(), 32);

    assert_eq!(
        backend.get(&path.document_path(first.as_str())).await.unwrap(),
        Some(doc(json!({"title": "a"})))
    );

    let mut listed = backend.list(&path).await.unwrap();
    listed.sort_by_key(|(_, value)| value.get("title").and_then(|v| v.as_str()).map(str::to_string));
    assert_eq!(
        listed,
        vec![
            (first, doc(json!({"title": "a"}))),
            (second, doc(json!({"title": "b"}))),
        ]
    );
}

/// `update` deep-merges maps, replaces everything else and returns the
/// stored value.
pub async fn check_update_merges(backend: &dyn Backend, collection: &str) {
    let path = DocumentPath::root(collection, "merge");

    let stored = backend
        .update(&path, doc(json!({"a": {"x": 1}, "tags": ["p", "q"]})))
        .await
        .unwrap();
    assert_eq!(stored, doc(json!({"a": {"x": 1}, "tags": ["p", "q"]})));

    let stored = backend
        .update(&path, doc(json!({"a": {"y": 2}, "tags": ["r"]})))
        .await
        .unwrap();
    assert_eq!(stored, doc(json!({"a": {"x": 1, "y": 2}, "tags": ["r"]})));
    assert_eq!(backend.get(&path).await.unwrap(), Some(stored.clone()));

    let again = backend
        .update(&path, doc(json!({"a": {"y": 2}, "tags": ["r"]})))
        .await
        .unwrap();
    assert_eq!(again, stored);
}

/// Removing a document reads back as absent and reaches subscribers as
/// `(id, None)`.
pub async fn check_tombstone_round_trip(backend: &dyn Backend, collection: &str) {
    let path = DocumentPath::root(collection, "doomed");
    backend.update(&path, doc(json!({"n": 1}))).await.unwrap();

    let recorder = RecordingCallback::new();
    let subscription = backend
        .subscribe_document(&path, recorder.callback())
        .await
        .unwrap();
    recorder.wait_for(1, DELIVERY_TIMEOUT).await;

    backend.remove(&path).await.unwrap();
    assert_eq!(backend.get(&path).await.unwrap(), None);

    let deliveries = recorder.wait_for(2, DELIVERY_TIMEOUT).await;
    assert_eq!(
        deliveries,
        vec![
            ("doomed".to_string(), Some(doc(json!({"n": 1})))),
            ("doomed".to_string(), None),
        ]
    );
    subscription.unsubscribe().await.unwrap();
}

/// A collection subscription gets one delivery per existing child, then
/// one per later change of a direct child, and nothing after unsubscribing.
pub async fn check_collection_subscription(backend: &dyn Backend, collection: &str) {
    let parent = DocumentPath::root(collection, "watched");
    let children = parent.collection("children");
    backend
        .update(&children.document_path("one"), doc(json!({"n": 1})))
        .await
        .unwrap();

    let recorder = RecordingCallback::new();
    let subscription = backend
        .subscribe_collection(&children, recorder.callback())
        .await
        .unwrap();
    assert_eq!(
        recorder.wait_for(1, DELIVERY_TIMEOUT).await,
        vec![("one".to_string(), Some(doc(json!({"n": 1}))))]
    );

    backend
        .update(&children.document_path("two"), doc(json!({"n": 2})))
        .await
        .unwrap();
    backend
        .update(
            &children.document_path("two").collection("deeper").document_path("x"),
            doc(json!({"n": 3})),
        )
        .await
        .unwrap();
    backend.update(&parent, doc(json!({"n": 4}))).await.unwrap();
    backend.remove(&children.document_path("one")).await.unwrap();

    let deliveries = recorder.wait_for(3, DELIVERY_TIMEOUT).await;
    assert_eq!(
        deliveries[1..],
        [
            ("two".to_string(), Some(doc(json!({"n": 2})))),
            ("one".to_string(), None),
        ]
    );

    subscription.unsubscribe().await.unwrap();
    recorder.clear();
    backend
        .update(&children.document_path("three"), doc(json!({"n": 5})))
        .await
        .unwrap();
    // Round trip so any snapshot already in flight has arrived.
    backend.get(&children.document_path("three")).await.unwrap();
    assert!(recorder.is_empty(), "delivery after unsubscribe: {:?}", recorder.deliveries());
}

/// Two subscriptions to one document are independent: dropping one leaves
/// the other receiving.
pub async fn check_refcounted_subscribers(backend: &dyn Backend, collection: &str) {
    let path = DocumentPath::root(collection, "shared");
    let first = RecordingCallback::new();
    let second = RecordingCallback::new();

    let a = backend.subscribe_document(&path, first.callback()).await.unwrap();
    let b = backend.subscribe_document(&path, second.callback()).await.unwrap();
    second.wait_for(1, DELIVERY_TIMEOUT).await;

    a.unsubscribe().await.unwrap();
    second.clear();
    backend.update(&path, doc(json!({"v": 1}))).await.unwrap();
    assert_eq!(
        second.wait_for(1, DELIVERY_TIMEOUT).await,
        vec![("shared".to_string(), Some(doc(json!({"v": 1}))))]
    );
    b.unsubscribe().await.unwrap();
}

/// Document operations on an empty path fail before reaching the store.
pub async fn check_empty_path(backend: &dyn Backend) {
    let empty = DocumentPath::default();
    let err = backend.get(&empty).await.unwrap_err();
    assert!(err.is_invalid_input(), "unexpected error {err:?}");
    let err = backend.remove(&empty).await.unwrap_err();
    assert!(err.is_invalid_input(), "unexpected error {err:?}");
}

/// Files are described by a `{name, type}` document and have a URL.
pub async fn check_files(backend: &dyn Backend, collection: &str) {
    let files = CollectionPath::root(collection).document_path("owner").collection("files");
    let id = backend
        .add_file(&files, FileUpload::new("a.txt", "text/plain", b"hello".to_vec()))
        .await
        .unwrap();
    let path = files.document_path(id.as_str());

    assert_eq!(
        backend.get(&path).await.unwrap(),
        Some(doc(json!({"name": "a.txt", "type": "text/plain"})))
    );
    assert!(backend.file_url(&path).await.unwrap().ends_with(&id));

    backend.delete_file(&path).await.unwrap();
    assert_eq!(backend.get(&path).await.unwrap(), None);
}

/// Denied writes fail with [`CoreError::Forbidden`] and change nothing.
pub async fn check_forbidden(backend: &dyn Backend, read_only: &str) {
    let path = DocumentPath::root(read_only, "x");
    let err = backend.update(&path, doc(json!({"n": 1}))).await.unwrap_err();
    assert!(err.is_forbidden(), "unexpected error {err:?}");

    let err = backend
        .add(&CollectionPath::root(read_only), doc(json!({"n": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden { .. }), "unexpected error {err:?}");

    let err = backend.remove(&path).await.unwrap_err();
    assert!(err.is_forbidden(), "unexpected error {err:?}");
    assert_eq!(backend.get(&path).await.unwrap(), None);
}

/// The collection facade keeps its document list in sync.
pub async fn check_collection_facade(backend: Arc<dyn Backend>, collection: &str) {
    let posts = Collection::at(
        backend,
        CollectionPath::root(collection).document_path("facade").collection("posts"),
    );
    let subscription = posts.subscribe().await.unwrap();

    let post = posts.add(doc(json!({"title": "a"}))).await.unwrap();
    wait_until(|| posts.documents().len() == 1).await;
    assert_eq!(posts.documents()[0].id(), post.id());

    post.update(doc(json!({"title": "b"}))).await.unwrap();
    wait_until(|| {
        posts
            .documents()
            .first()
            .and_then(|d| d.value().ok())
            .map(|v| v == doc(json!({"title": "b"})))
            .unwrap_or(false)
    })
    .await;

    post.remove().await.unwrap();
    wait_until(|| posts.documents().is_empty()).await;
    subscription.unsubscribe().await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(DELIVERY_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within {DELIVERY_TIMEOUT:?}");
}
