//! In-process publish/subscribe keyed by encoded path.
//!
//! The bus is shared by every backend and server session that must observe
//! each other's writes. A mutation of document `d` is published twice: once
//! on the topic `encode(d)` and once on the topic of its parent collection.
//!
//! Listeners are invoked synchronously, in registration order, on the task
//! that publishes. The registry lock is released before any listener runs,
//! so a listener may register or remove listeners itself.
//!
//! Writers hold [`EventBus::sequence`] across "mutate then publish" and
//! subscribers hold it across "read, deliver, then register". Everyone that
//! shares a bus therefore observes a subscription's initial state and the
//! following publications without a gap or a duplicate.

use crate::error::CoreResult;
use crate::path::{DocumentPath, Path};
use crate::value::Document;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// One change as seen by a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// The topic's path: the document itself or its parent collection.
    pub path: Path,
    /// Id of the changed document.
    pub id: String,
    /// New value, or `None` if the document was removed.
    pub value: Option<Document>,
}

/// Callback attached to a topic.
pub type Listener = Arc<dyn Fn(&Publication) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Inner {
    topics: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
    sequencer: Mutex<()>,
}

/// Shared topic registry.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sequencer: Mutex::new(()),
            }),
        }
    }

    /// Waits for exclusive use of the bus's write/subscribe sequence.
    pub async fn sequence(&self) -> MutexGuard<'_, ()> {
        self.inner.sequencer.lock().await
    }

    /// Registers `listener` on `topic`.
    pub fn on(&self, topic: impl Into<String>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        trace!(%topic, listener = id.0, "listener attached");
        self.inner
            .topics
            .write()
            .entry(topic)
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not registered on `topic`.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut topics = self.inner.topics.write();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        if removed {
            trace!(%topic, listener = id.0, "listener detached");
        }
        removed
    }

    /// Invokes every listener on `topic` with `publication`.
    pub fn emit(&self, topic: &str, publication: &Publication) {
        let listeners: Vec<Listener> = match self.inner.topics.read().get(topic) {
            Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        for listener in listeners {
            listener(publication);
        }
    }

    /// Publishes a document change to its own topic and its parent
    /// collection's topic.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::CoreError::EmptyPath`] for an empty path.
    pub fn publish_change(&self, path: &DocumentPath, value: Option<Document>) -> CoreResult<()> {
        let id = path.id()?.to_string();
        let collection = path.collection_path()?;

        let document_topic = path.encode();
        let collection_topic = collection.encode();

        self.emit(
            &document_topic,
            &Publication {
                path: Path::Document(path.clone()),
                id: id.clone(),
                value: value.clone(),
            },
        );
        self.emit(
            &collection_topic,
            &Publication {
                path: Path::Collection(collection),
                id,
                value,
            },
        );
        Ok(())
    }

    /// Returns the number of listeners on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Returns the total number of listeners across all topics.
    pub fn total_listeners(&self) -> usize {
        self.inner.topics.read().values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.topics.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Listener, Arc<Mutex<Vec<Publication>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |publication: &Publication| {
            sink.lock().push(publication.clone());
        });
        (listener, seen)
    }

    #[test]
    fn publish_reaches_document_and_collection() {
        let bus = EventBus::new();
        let (doc_listener, doc_seen) = recorder();
        let (col_listener, col_seen) = recorder();
        bus.on("posts/a", doc_listener);
        bus.on("posts", col_listener);

        let value = json!({"title": "hi"}).as_object().cloned();
        bus.publish_change(&DocumentPath::root("posts", "a"), value.clone())
            .unwrap();

        let doc_seen = doc_seen.lock();
        let col_seen = col_seen.lock();
        assert_eq!(doc_seen.len(), 1);
        assert_eq!(col_seen.len(), 1);
        assert_eq!(doc_seen[0].id, "a");
        assert_eq!(col_seen[0].value, value);
        assert_eq!(col_seen[0].path.encode(), "posts");
    }

    #[test]
    fn nested_collection_is_not_notified() {
        let bus = EventBus::new();
        let (listener, seen) = recorder();
        bus.on("posts", listener);

        let nested = DocumentPath::root("posts", "a").child("comments", "c1");
        bus.publish_change(&nested, None).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn off_detaches_and_reclaims_topic() {
        let bus = EventBus::new();
        let (listener, seen) = recorder();
        let id = bus.on("posts/a", listener);
        assert_eq!(bus.listener_count("posts/a"), 1);

        assert!(bus.off("posts/a", id));
        assert!(!bus.off("posts/a", id));
        assert_eq!(bus.listener_count("posts/a"), 0);
        assert_eq!(bus.total_listeners(), 0);

        bus.publish_change(&DocumentPath::root("posts", "a"), None)
            .unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn listener_may_reenter_bus() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.on(
            "t",
            Arc::new(move |_: &Publication| {
                inner.on("other", Arc::new(|_: &Publication| {}));
            }),
        );
        bus.emit(
            "t",
            &Publication {
                path: Path::Document(DocumentPath::root("t", "x")),
                id: "x".into(),
                value: None,
            },
        );
        assert_eq!(bus.listener_count("other"), 1);
    }

    #[test]
    fn empty_path_is_rejected() {
        let bus = EventBus::new();
        assert!(bus.publish_change(&DocumentPath::default(), None).is_err());
    }
}
