//! Structural diff of two dynamic JSON values.
//!
//! A recursive walk that reports only the differences, producing a
//! value that can be re-applied on the receiving side - either a full
//! replacement or a sparse, possibly-nested object carrying `null`
//! deletion markers.
//!
//! `serde_json::Value` trees are acyclic by construction (there is no
//! way to build a `Value` that contains itself), so the cycle-safety
//! requirement from the original design notes is satisfied without an
//! identity-visited set: there is nothing for one to guard against.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The result of diffing `old` against `new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StateDiff {
    /// Neither side was a plain object: the receiver should treat
    /// `data` as the whole new value.
    Full(Value),
    /// Both sides were plain objects: `data` is a sparse object whose
    /// entries are `null` (deletion), the new value (addition or
    /// scalar/array change), or a nested sparse object (recursive
    /// change), one level at a time.
    Diff(Map<String, Value>),
}

/// Diff `old` against `new`, per the rules in the module documentation.
pub fn diff(old: &Value, new: &Value) -> StateDiff {
    match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => StateDiff::Diff(diff_object(old, new)),
        _ => StateDiff::Full(new.clone()),
    }
}

fn diff_object(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, old_value) in old {
        if !new.contains_key(key) {
            out.insert(key.clone(), Value::Null);
        }
    }

    for (key, new_value) in new {
        match old.get(key) {
            None => {
                out.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if old_value == new_value => {
                // Deeply equal: omitted.
            }
            Some(old_value) => {
                if let (Some(old_sub), Some(new_sub)) =
                    (old_value.as_object(), new_value.as_object())
                {
                    out.insert(
                        key.clone(),
                        Value::Object(diff_object(old_sub, new_sub)),
                    );
                } else {
                    // Arrays are compared element-wise above (via `==`)
                    // but never diffed internally: any difference, or a
                    // scalar change, emits the whole new value.
                    out.insert(key.clone(), new_value.clone());
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_object_either_side_is_full() {
        assert_eq!(
            diff(&json!([1, 2]), &json!([1, 2, 3])),
            StateDiff::Full(json!([1, 2, 3]))
        );
        assert_eq!(diff(&json!(1), &json!({"a": 1})), StateDiff::Full(json!({"a": 1})));
        assert_eq!(diff(&json!({"a": 1}), &json!(null)), StateDiff::Full(Value::Null));
    }

    #[test]
    fn deletion_is_null_sentinel() {
        let diff = diff(&json!({"a": 1, "b": 2}), &json!({"a": 1}));
        assert_eq!(diff, StateDiff::Diff(json!({"b": null}).as_object().unwrap().clone()));
    }

    #[test]
    fn addition_is_new_value() {
        let diff = diff(&json!({"a": 1}), &json!({"a": 1, "b": 2}));
        assert_eq!(diff, StateDiff::Diff(json!({"b": 2}).as_object().unwrap().clone()));
    }

    #[test]
    fn nested_mapping_diff_recurses() {
        let diff = diff(
            &json!({"todos": {"1": {"text": "hi", "completed": false}}}),
            &json!({"todos": {"1": {"text": "hi", "completed": true}}}),
        );
        assert_eq!(
            diff,
            StateDiff::Diff(
                json!({"todos": {"1": {"completed": true}}})
                    .as_object()
                    .unwrap()
                    .clone()
            )
        );
    }

    #[test]
    fn array_changes_are_whole_value_never_internally_diffed() {
        let diff = diff(&json!({"a": [1, 2, 3]}), &json!({"a": [1, 2, 4]}));
        assert_eq!(diff, StateDiff::Diff(json!({"a": [1, 2, 4]}).as_object().unwrap().clone()));
    }

    #[test]
    fn deep_equality_omits_the_key() {
        let diff = diff(
            &json!({"a": 1, "b": {"c": 2}}),
            &json!({"a": 1, "b": {"c": 2}}),
        );
        assert_eq!(diff, StateDiff::Diff(Map::new()));
    }

    #[test]
    fn wire_shape_matches_tagged_contract() {
        let full = diff(&json!([1]), &json!([2]));
        assert_eq!(
            serde_json::to_value(&full).unwrap(),
            json!({"type": "full", "data": [2]})
        );

        let sparse = diff(&json!({"a": 1}), &json!({"a": 2}));
        assert_eq!(
            serde_json::to_value(&sparse).unwrap(),
            json!({"type": "diff", "data": {"a": 2}})
        );
    }
}
