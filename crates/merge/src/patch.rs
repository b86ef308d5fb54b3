use serde_json::{Map, Value};

/// A shallow, root-field-scoped update to apply to the host store.
///
/// `buildStateUpdate` in the original design always touches exactly one
/// root field; `Set` carries its fully-rebuilt value (ancestors copied,
/// never mutated in place), `Remove` drops the root field entirely,
/// which only happens when the updated path *is* the root field and
/// the update is a deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum StatePatch {
    Set { root: String, value: Value },
    Remove { root: String },
}

impl StatePatch {
    /// Apply this patch to a root state object.
    pub fn apply(self, state: &mut Map<String, Value>) {
        match self {
            StatePatch::Set { root, value } => {
                state.insert(root, value);
            }
            StatePatch::Remove { root } => {
                state.remove(&root);
            }
        }
    }
}

/// Build a targeted update for `path_string` (segments joined by `.`)
/// carrying `new_value`, relative to the current root state `current`.
///
/// - `new_value: None` is a remote deletion: the innermost key is
///   removed, preserving siblings at every ancestor level.
/// - `new_value: Some(v)` with `segments.len() <= z_factor` deep-merges
///   `v` into the existing value, so a higher-altitude remote update
///   never clobbers sibling fields held at finer granularity.
/// - Otherwise the value at the path is replaced outright.
///
/// Returns `None` for an empty path, which is a no-op.
pub fn build_state_update(
    path: &str,
    new_value: Option<&Value>,
    current: &Value,
    z_factor: usize,
) -> Option<StatePatch> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let (root, rest) = segments.split_first()?;
    let root = root.to_string();

    let current_root = current.get(&root).cloned().unwrap_or(Value::Null);

    let patch = match new_value {
        None if rest.is_empty() => StatePatch::Remove { root },
        None => StatePatch::Set {
            root,
            value: delete_at(&current_root, rest),
        },
        Some(v) if segments.len() <= z_factor => StatePatch::Set {
            root,
            value: merge_at(&current_root, rest, v),
        },
        Some(v) => StatePatch::Set {
            root,
            value: replace_at(&current_root, rest, v),
        },
    };

    Some(patch)
}

fn replace_at(current: &Value, segments: &[&str], new_value: &Value) -> Value {
    match segments.split_first() {
        None => new_value.clone(),
        Some((head, rest)) => {
            let mut map = current.as_object().cloned().unwrap_or_default();
            let child = map.get(*head).cloned().unwrap_or(Value::Null);
            map.insert(head.to_string(), replace_at(&child, rest, new_value));
            Value::Object(map)
        }
    }
}

fn merge_at(current: &Value, segments: &[&str], new_value: &Value) -> Value {
    match segments.split_first() {
        None => deep_merge(current, new_value),
        Some((head, rest)) => {
            let mut map = current.as_object().cloned().unwrap_or_default();
            let child = map.get(*head).cloned().unwrap_or(Value::Null);
            map.insert(head.to_string(), merge_at(&child, rest, new_value));
            Value::Object(map)
        }
    }
}

fn deep_merge(current: &Value, incoming: &Value) -> Value {
    match (current.as_object(), incoming.as_object()) {
        (Some(cur), Some(inc)) => {
            let mut merged = cur.clone();
            for (k, v) in inc {
                let merged_v = match merged.get(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), merged_v);
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn delete_at(current: &Value, segments: &[&str]) -> Value {
    let mut map = current.as_object().cloned().unwrap_or_default();
    match segments.split_first() {
        None => Value::Object(map),
        Some((head, rest)) if rest.is_empty() => {
            map.remove(*head);
            Value::Object(map)
        }
        Some((head, rest)) => {
            if let Some(child) = map.get(*head) {
                let updated = delete_at(child, rest);
                map.insert(head.to_string(), updated);
            }
            Value::Object(map)
        }
    }
}

/// Write `value` into `obj` at the nested position named by `segments`,
/// creating intermediate mappings as needed and overwriting any
/// intermediate that is not already a mapping. A no-op for empty
/// `segments`.
pub fn set_nested_value(obj: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        obj.insert(head.clone(), value);
        return;
    }

    let entry = obj.entry(head.clone()).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    set_nested_value(entry.as_object_mut().expect("just ensured object"), rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state(v: Value) -> Value {
        v
    }

    #[test]
    fn merge_at_z_factor_preserves_siblings() {
        // Scenario: zFactor = 3, remote update on "a.b.c" with {d: 10}
        // must leave "e" untouched.
        let current = state(json!({"a": {"b": {"c": {"d": 1, "e": 2}}}}));
        let patch = build_state_update("a.b.c", Some(&json!({"d": 10})), &current, 3).unwrap();
        assert_eq!(
            patch,
            StatePatch::Set {
                root: "a".to_string(),
                value: json!({"b": {"c": {"d": 10, "e": 2}}}),
            }
        );
    }

    #[test]
    fn replace_beyond_z_factor_clobbers_whole_leaf() {
        let current = state(json!({"todos": {"1": {"extra": {"x": 1, "y": 2}}}}));
        // zFactor = 2, path depth = 3: replace, not merge.
        let patch =
            build_state_update("todos.1.extra", Some(&json!({"x": 99})), &current, 2).unwrap();
        assert_eq!(
            patch,
            StatePatch::Set {
                root: "todos".to_string(),
                value: json!({"1": {"extra": {"x": 99}}}),
            }
        );
    }

    #[test]
    fn single_leaf_update_touches_only_that_key() {
        let current = state(json!({"todos": {"1": {"id": "1", "text": "hi", "completed": false}}}));
        let patch =
            build_state_update("todos.1.completed", Some(&json!(true)), &current, 2).unwrap();
        assert_eq!(
            patch,
            StatePatch::Set {
                root: "todos".to_string(),
                value: json!({"1": {"id": "1", "text": "hi", "completed": true}}),
            }
        );
    }

    #[test]
    fn deletion_removes_innermost_key_preserving_siblings() {
        let current = state(json!({"todos": {"1": {"id": "1", "text": "hi"}, "2": {"id": "2"}}}));
        let patch = build_state_update("todos.1.text", None, &current, 2).unwrap();
        assert_eq!(
            patch,
            StatePatch::Set {
                root: "todos".to_string(),
                value: json!({"1": {"id": "1"}, "2": {"id": "2"}}),
            }
        );
    }

    #[test]
    fn deleting_a_whole_root_field_removes_it() {
        let current = state(json!({"counter": 5, "title": "x"}));
        let patch = build_state_update("counter", None, &current, 2).unwrap();
        assert_eq!(patch, StatePatch::Remove { root: "counter".to_string() });
    }

    #[test]
    fn empty_path_is_a_no_op() {
        let current = state(json!({}));
        assert_eq!(build_state_update("", Some(&json!(1)), &current, 2), None);
    }

    #[test]
    fn set_nested_value_creates_intermediates() {
        let mut obj = Map::new();
        set_nested_value(
            &mut obj,
            &["todos".to_string(), "1".to_string(), "id".to_string()],
            json!("1"),
        );
        assert_eq!(Value::Object(obj), json!({"todos": {"1": {"id": "1"}}}));
    }

    #[test]
    fn set_nested_value_overwrites_non_mapping_intermediate() {
        let mut obj = Map::new();
        obj.insert("a".to_string(), json!("scalar"));
        set_nested_value(&mut obj, &["a".to_string(), "b".to_string()], json!(1));
        assert_eq!(Value::Object(obj), json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_nested_value_empty_segments_is_a_no_op() {
        let mut obj = Map::new();
        obj.insert("a".to_string(), json!(1));
        set_nested_value(&mut obj, &[], json!(2));
        assert_eq!(Value::Object(obj), json!({"a": 1}));
    }
}
