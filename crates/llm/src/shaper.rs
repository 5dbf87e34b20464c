//! Per-backend payload shaping.
//!
//! Three pure transforms over a JSON tree: delete named keys, add default
//! keys without overwriting, and rename keys. All three recurse through
//! objects and array elements and return a fresh tree; the input is never
//! mutated. A backend's transforms compose as delete → add → rename:
//! deletion first removes incompatible fields, addition supplies
//! backend-required defaults, and renaming then adapts to upstream
//! naming.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::catalog::Transforms;

/// Recursively remove every object entry whose key is in `names`.
pub fn delete(tree: &Value, names: &[String]) -> Value {
    if names.is_empty() {
        return tree.clone();
    }

    match tree {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                if names.iter().any(|name| name == key) {
                    continue;
                }
                out.insert(key.clone(), delete(value, names));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| delete(item, names)).collect()),
        scalar => scalar.clone(),
    }
}

/// Recursively set `key = value` on every object node where the key is
/// absent. Existing keys always win.
pub fn add(tree: &Value, additions: &BTreeMap<String, Value>) -> Value {
    if additions.is_empty() {
        return tree.clone();
    }

    match tree {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len() + additions.len());
            for (key, value) in map {
                out.insert(key.clone(), add(value, additions));
            }
            for (key, value) in additions {
                if !out.contains_key(key) {
                    out.insert(key.clone(), value.clone());
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| add(item, additions)).collect()),
        scalar => scalar.clone(),
    }
}

/// Recursively substitute object keys using `renames`.
pub fn rename(tree: &Value, renames: &BTreeMap<String, String>) -> Value {
    if renames.is_empty() {
        return tree.clone();
    }

    match tree {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let key = renames.get(key).cloned().unwrap_or_else(|| key.clone());
                out.insert(key, rename(value, renames));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| rename(item, renames)).collect()),
        scalar => scalar.clone(),
    }
}

/// Apply a backend's transforms in delete → add → rename order.
pub fn apply(transforms: &Transforms, tree: &Value) -> Value {
    let tree = delete(tree, &transforms.delete);
    let tree = add(&tree, &transforms.add);
    rename(&tree, &transforms.rename)
}
