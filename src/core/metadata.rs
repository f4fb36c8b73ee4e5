//! Object metadata.
//!
//! Metadata is a small ordered list of string pairs attached to every
//! container object. The exporter uses it to mark layered objects
//! (`prune`, `replace`) so a downstream layer merge knows how to combine
//! them with the base scene.

use smallvec::SmallVec;
use std::fmt;

/// Metadata storage - key-value pairs of strings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MetaData {
    entries: SmallVec<[(String, String); 2]>,
}

impl MetaData {
    /// Key marking a pruned object.
    pub const PRUNE_KEY: &'static str = "prune";

    /// Key marking an object that replaces the base scene's subtree.
    pub const REPLACE_KEY: &'static str = "replace";

    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a metadata value, replacing an existing one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a metadata value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check if a key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over key-value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if the object is marked as pruned.
    pub fn is_pruned(&self) -> bool {
        self.get(Self::PRUNE_KEY) == Some("1")
    }

    /// True if the object is marked as replacing its base subtree.
    pub fn is_replaced(&self) -> bool {
        self.get(Self::REPLACE_KEY) == Some("1")
    }

    /// Serialize as "key=value;key2=value2".
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Debug for MetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            ';' => result.push_str("\\;"),
            '=' => result.push_str("\\="),
            _ => result.push(c),
        }
    }
    result
}
