use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::tree;

/// Immutable copy of the data at one location, taken when an event was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSnapshot {
    key: Option<String>,
    value: Value,
}

impl DataSnapshot {
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self { key, value }
    }

    pub(crate) fn at(path: &[String], value: Value) -> Self {
        Self::new(path.last().cloned(), value)
    }

    /// Last path segment; `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// `false` when nothing is stored at the location.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Snapshot of a descendant; `path` may contain `/`.
    pub fn child(&self, path: &str) -> DataSnapshot {
        let segments = tree::split_path(path);
        let key = segments.last().cloned().or_else(|| self.key.clone());
        Self::new(key, tree::read(&self.value, &segments))
    }

    pub fn has_children(&self) -> bool {
        self.children_count() > 0
    }

    pub fn children_count(&self) -> usize {
        self.value.as_object().map_or(0, |map| map.len())
    }

    /// Direct children ordered by key.
    pub fn children(&self) -> Vec<DataSnapshot> {
        tree::children(&self.value)
            .into_iter()
            .map(|(key, value)| Self::new(Some(key.to_string()), value.clone()))
            .collect()
    }

    /// Deserializes the stored value.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
