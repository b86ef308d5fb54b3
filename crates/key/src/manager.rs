use crate::codec::{decode_segment, encode_segment};
use crate::Error;

/// Lexicographic half-open range covering every key in a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRange {
    pub start: String,
    pub end: String,
}

/// Composes and parses full storage keys of the form
/// `<namespace>:<seg1>:<seg2>...`, and isolates one store's keys from
/// another's.
#[derive(Debug, Clone)]
pub struct KeyManager {
    namespace: String,
    prefix: String,
}

impl KeyManager {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let prefix = format!("{namespace}:");
        Self { namespace, prefix }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Percent-encode each segment, join with `:`, and prepend the
    /// namespace prefix.
    pub fn make_key<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut key = self.prefix.clone();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                key.push(':');
            }
            key.push_str(&encode_segment(segment.as_ref()));
        }
        key
    }

    /// Strip the namespace prefix, split on `:`, and decode each segment.
    pub fn parse_key(&self, full_key: &str) -> Result<Vec<String>, Error> {
        let rest = full_key
            .strip_prefix(&self.prefix)
            .ok_or_else(|| Error::InvalidKey(full_key.to_string()))?;

        if rest.is_empty() {
            return Ok(Vec::new());
        }

        rest.split(':')
            .map(|segment| decode_segment(segment).map_err(|_| Error::InvalidKey(full_key.to_string())))
            .collect()
    }

    /// `true` iff `full_key` belongs to this manager's namespace.
    pub fn owns(&self, full_key: &str) -> bool {
        full_key.starts_with(&self.prefix)
    }

    /// `[ "<namespace>:", "<namespace>:￿" )`, the half-open range
    /// that contains every key of this namespace.
    pub fn namespace_range(&self) -> NamespaceRange {
        NamespaceRange {
            start: self.prefix.clone(),
            end: format!("{}\u{FFFF}", self.prefix),
        }
    }
}
