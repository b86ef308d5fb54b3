use serde_json::Value;

/// Depth-first enumeration of `(path, value)` leaf pairs under `value`,
/// down to `max_depth` segments beyond `parent`.
///
/// At each mapping node, children are emitted as leaves - instead of
/// being descended into - as soon as the node is at `max_depth` or any
/// child is itself not a mapping. Primitives and arrays always
/// terminate a branch immediately.
pub struct ExtractPaths {
    stack: Vec<(Vec<String>, Value)>,
}

impl ExtractPaths {
    pub fn new(value: &Value, parent: &[String], max_depth: usize) -> Self {
        let mut out = Vec::new();
        walk(parent.to_vec(), value, max_depth, &mut out);
        // `walk` appends in visitation order; drive pop() from the back so
        // the public iterator still yields a depth-first order.
        out.reverse();
        Self { stack: out }
    }
}

impl Iterator for ExtractPaths {
    type Item = (Vec<String>, Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.stack.pop()
    }
}

fn walk(path: Vec<String>, value: &Value, max_depth: usize, out: &mut Vec<(Vec<String>, Value)>) {
    let Some(map) = value.as_object() else {
        // Primitive or array: this branch terminates here, at `path`
        // itself (the caller's `parent` for the initial call).
        out.push((path, value.clone()));
        return;
    };

    let stop = path.len() + 1 > max_depth || map.values().any(|child| !child.is_object());

    for (segment, child) in map {
        let mut child_path = path.clone();
        child_path.push(segment.clone());

        if stop {
            out.push((child_path, child.clone()));
        } else {
            walk(child_path, child, max_depth, out);
        }
    }
}

/// Enumerate `(path, value)` leaf pairs as a `Vec`, for callers that
/// want to diff two enumerations against each other without juggling
/// an iterator's borrow.
pub fn extract_paths(value: &Value, parent: &[String], max_depth: usize) -> Vec<(Vec<String>, Value)> {
    ExtractPaths::new(value, parent, max_depth).collect()
}
