//! Property-based test generators using proptest.
//!
//! Provides strategies for paths and document values that respect the
//! encoding rules: segments are non-empty and never contain the separator.

use docsync_core::{CollectionPath, Document, DocumentPath, PathElement, Value};
use proptest::prelude::*;

/// Strategy for a single path segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,12}"
}

/// Strategy for non-empty document paths up to four levels deep.
pub fn document_path_strategy() -> impl Strategy<Value = DocumentPath> {
    prop::collection::vec((segment_strategy(), segment_strategy()), 1..5).prop_map(|pairs| {
        DocumentPath::new(
            pairs
                .into_iter()
                .map(|(collection, id)| PathElement::new(collection, id))
                .collect(),
        )
    })
}

/// Strategy for collection paths, rooted or nested.
pub fn collection_path_strategy() -> impl Strategy<Value = CollectionPath> {
    (
        prop::collection::vec((segment_strategy(), segment_strategy()), 0..4),
        segment_strategy(),
    )
        .prop_map(|(parents, collection)| {
            let parent = DocumentPath::new(
                parents
                    .into_iter()
                    .map(|(collection, id)| PathElement::new(collection, id))
                    .collect(),
            );
            CollectionPath::new(parent, collection)
        })
}

/// Strategy for scalar JSON values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for nested JSON values: scalars, arrays and maps.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-e]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for documents with keys drawn from a small alphabet, so that
/// independently generated documents often share keys.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-e]", value_strategy(), 0..5)
        .prop_map(|map| map.into_iter().collect())
}
