//! JSON tree helpers shared by the realtime backends.
//!
//! Semantics follow the hosted store: writing `null` deletes, and objects
//! left empty by a delete disappear.

use super::ChildEvent;
use serde_json::{Map, Value};

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn get<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in path {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Write `value` at `path`, creating intermediate objects.
pub fn set(root: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *root = value;
        return;
    };

    if !root.is_object() {
        if value.is_null() {
            return;
        }
        *root = Value::Object(Map::new());
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }

    let child = map.entry(head.clone()).or_insert(Value::Null);
    set(child, rest, value);
    if is_empty(child) {
        map.remove(head);
    }
}

/// Apply a multi-location update: each key of `updates` is a relative path.
pub fn patch(root: &mut Value, path: &[String], updates: &Map<String, Value>) {
    for (relative, value) in updates {
        let mut full = path.to_vec();
        full.extend(segments(relative));
        set(root, &full, value.clone());
    }
}

/// Direct children of the object at `path`.
pub fn children(root: &Value, path: &[String]) -> Map<String, Value> {
    get(root, path)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Child events that turn `before` into `after`, in key order.
pub fn diff_children(before: &Map<String, Value>, after: &Map<String, Value>) -> Vec<ChildEvent> {
    let mut events = Vec::new();
    for (key, value) in after {
        match before.get(key) {
            None => events.push(ChildEvent::Added {
                key: key.clone(),
                value: value.clone(),
            }),
            Some(old) if old != value => events.push(ChildEvent::Changed {
                key: key.clone(),
                value: value.clone(),
            }),
            Some(_) => {}
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            events.push(ChildEvent::Removed { key: key.clone() });
        }
    }
    events
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
