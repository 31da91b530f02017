//! Document values and the merge applied by `update`.

use serde_json::Map;

/// A JSON-like value stored inside documents.
pub type Value = serde_json::Value;

/// A document: an open-ended attribute map.
///
/// The absence of a document (`Option::None`) is the tombstone; it is never
/// stored.
pub type Document = Map<String, Value>;

/// Deep-merges `patch` into `target`.
///
/// For each key in `patch`, if both the existing and the new value are
/// maps they are merged recursively; otherwise the new value replaces the
/// old one outright. Arrays and scalars are never combined.
pub fn merge(target: &mut Document, patch: Document) {
    for (key, incoming) in patch {
        match (target.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge(existing, nested),
            (_, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

/// Produces the value stored by an update: `patch` as-is when there is no
/// prior value, otherwise `patch` merged into `current`.
pub fn merged(current: Option<Document>, patch: Document) -> Document {
    match current {
        None => patch,
        Some(mut current) => {
            merge(&mut current, patch);
            current
        }
    }
}

/// Converts a JSON value into a document, if it is an object.
pub fn into_document(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        into_document(value).unwrap()
    }

    #[test]
    fn merge_into_nothing_stores_patch() {
        let stored = merged(None, doc(json!({"a": 1})));
        assert_eq!(Value::Object(stored), json!({"a": 1}));
    }

    #[test]
    fn merge_disjoint_keys() {
        let stored = merged(Some(doc(json!({"a": 1}))), doc(json!({"b": 2})));
        assert_eq!(Value::Object(stored), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_nested_maps() {
        let stored = merged(Some(doc(json!({"a": {"x": 1}}))), doc(json!({"a": {"y": 2}})));
        assert_eq!(Value::Object(stored.clone()), json!({"a": {"x": 1, "y": 2}}));

        let stored = merged(Some(stored), doc(json!({"a": {"x": 5}})));
        assert_eq!(Value::Object(stored), json!({"a": {"x": 5, "y": 2}}));
    }

    #[test]
    fn merge_replaces_arrays_and_scalars() {
        let stored = merged(
            Some(doc(json!({"tags": ["a", "b"], "n": {"deep": 1}}))),
            doc(json!({"tags": ["c"], "n": 3})),
        );
        assert_eq!(Value::Object(stored), json!({"tags": ["c"], "n": 3}));
    }

    #[test]
    fn merge_map_over_scalar_replaces() {
        let stored = merged(Some(doc(json!({"a": 1}))), doc(json!({"a": {"b": 2}})));
        assert_eq!(Value::Object(stored), json!({"a": {"b": 2}}));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ]
    }

    fn value() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::from),
                prop::collection::btree_map("[a-c]", inner, 0..3)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    fn document() -> impl Strategy<Value = Document> {
        prop::collection::btree_map("[a-d]", value(), 0..4).prop_map(|map| map.into_iter().collect())
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(base in prop::option::of(document()), patch in document()) {
            let once = merged(base.clone(), patch.clone());
            let twice = merged(Some(once.clone()), patch);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn patch_keys_win(base in document(), patch in document()) {
            let stored = merged(Some(base), patch.clone());
            for (key, value) in patch {
                if !value.is_object() {
                    prop_assert_eq!(stored.get(&key), Some(&value));
                }
            }
        }
    }
}
