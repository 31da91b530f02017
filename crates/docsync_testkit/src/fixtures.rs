//! Test fixtures and backend helpers.
//!
//! Provides rule sets, unique names and recording callbacks for tests
//! that drive a [`Backend`](docsync_core::Backend).

use docsync_core::{value::into_document, Callback, Document, Rule};
use parking_lot::Mutex;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rules granting read and write access to every document of each named
/// root collection.
pub fn open_rules(collections: &[&str]) -> Vec<Rule> {
    collections
        .iter()
        .map(|name| Rule::allow_all(format!("/{name}/:id")))
        .collect()
}

/// Returns a collection name that no other test uses.
pub fn unique_collection_name(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Builds a document from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn doc(value: serde_json::Value) -> Document {
    into_document(value).expect("document literal must be a JSON object")
}

/// Initializes tracing output for tests, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a
/// subscriber.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// One callback invocation.
pub type Delivery = (String, Option<Document>);

/// A subscription callback that records every delivery.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingCallback {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a callback that appends to this recorder.
    pub fn callback(&self) -> Callback {
        let deliveries = Arc::clone(&self.deliveries);
        Arc::new(move |id: &str, value: Option<&Document>| {
            deliveries.lock().push((id.to_string(), value.cloned()));
        })
    }

    /// Returns a copy of every delivery so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Returns the number of deliveries so far.
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Returns true if nothing was delivered yet.
    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }

    /// Forgets every delivery so far.
    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }

    /// Waits until at least `count` deliveries were recorded.
    ///
    /// # Panics
    ///
    /// Panics if that takes longer than `timeout`.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Delivery> {
        let waited = tokio::time::timeout(timeout, async {
            while self.len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {count} deliveries within {timeout:?}, got {:?}",
            self.deliveries()
        );
        self.deliveries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_names_differ() {
        assert_ne!(unique_collection_name("t"), unique_collection_name("t"));
        assert!(unique_collection_name("posts").starts_with("posts_"));
    }

    #[test]
    fn open_rules_cover_each_collection() {
        let rules = open_rules(&["a", "b"]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].path, "/b/:id");
    }

    #[test]
    fn recorder_collects_deliveries() {
        let recorder = RecordingCallback::new();
        let callback = recorder.callback();
        callback("a", Some(&doc(json!({"n": 1}))));
        callback("a", None);
        assert_eq!(
            recorder.deliveries(),
            vec![
                ("a".to_string(), Some(doc(json!({"n": 1})))),
                ("a".to_string(), None)
            ]
        );
        recorder.clear();
        assert!(recorder.is_empty());
    }
}
