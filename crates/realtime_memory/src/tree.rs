//! Path-addressed edits on a JSON tree. Empty objects and nulls are never stored.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn display_path(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

pub(crate) fn is_within(path: &[String], ancestor: &[String]) -> bool {
    path.starts_with(ancestor)
}

pub(crate) fn read(root: &Value, path: &[String]) -> Value {
    path.iter()
        .try_fold(root, |node, key| node.as_object()?.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Direct children ordered by key, independent of the map's iteration order.
pub(crate) fn children(value: &Value) -> BTreeMap<&str, &Value> {
    value
        .as_object()
        .map(|map| map.iter().map(|(key, child)| (key.as_str(), child)).collect())
        .unwrap_or_default()
}

/// Stores `value` at `path`; `Null` deletes. Intermediate objects are created as needed.
pub(crate) fn write(root: &mut Value, path: &[String], value: Value) {
    let value = normalize(value);
    match path.split_last() {
        None => *root = value,
        Some((last, parents)) => {
            let mut node = &mut *root;
            for key in parents {
                node = ensure_object(node)
                    .entry(key.clone())
                    .or_insert(Value::Null);
            }
            let map = ensure_object(node);
            if value.is_null() {
                map.remove(last);
            } else {
                map.insert(last.clone(), value);
            }
        }
    }
    if prune(root) {
        *root = Value::Null;
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

/// Arrays become index-keyed objects; nulls and empty objects disappear.
fn normalize(value: Value) -> Value {
    let map: Map<String, Value> = match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), normalize(item)))
            .filter(|(_, item)| !item.is_null())
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, item)| (key, normalize(item)))
            .filter(|(_, item)| !item.is_null())
            .collect(),
        leaf => return leaf,
    };
    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

/// Returns `true` when `value` holds nothing after pruning.
fn prune(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            map.retain(|_, child| !prune(child));
            map.is_empty()
        }
        Value::Null => true,
        _ => false,
    }
}
