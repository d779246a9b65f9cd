//! Field-path validation and dotted-path access into JSON documents.

use serde_json::{Map, Value};

use super::error::QueryError;

const MAX_FIELD_LEN: usize = 256;
const MAX_NAMESPACE_LEN: usize = 120;

/// Letters, digits, underscore; dots separate nested segments. The first
/// segment must start with a letter or underscore, later segments may be
/// array indices.
pub fn is_valid(path: &str) -> bool {
    if path.is_empty() || path.len() > MAX_FIELD_LEN {
        return false;
    }

    for (i, segment) in path.split('.').enumerate() {
        let Some(first) = segment.chars().next() else {
            return false;
        };
        if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        if i == 0 && !(first.is_ascii_alphabetic() || first == '_') {
            return false;
        }
    }
    true
}

pub fn validate(path: &str) -> Result<(), QueryError> {
    if is_valid(path) {
        Ok(())
    } else {
        Err(QueryError::InvalidField(path.to_string()))
    }
}

pub fn is_valid_namespace_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAMESPACE_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Resolve a dotted path; numeric segments index into arrays
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn lookup_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => map.get(path),
        Some((head, rest)) => lookup(map.get(head)?, rest),
    }
}

/// Insert `value` at a dotted path, creating intermediate objects
pub fn insert(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child_map) = child {
                insert(child_map, rest, value);
            }
        }
    }
}

/// Remove the value at a dotted path, returning it
pub fn remove(target: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => target.remove(path),
        Some((head, rest)) => match target.get_mut(head)? {
            Value::Object(child) => remove(child, rest),
            _ => None,
        },
    }
}

pub fn segments(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}
