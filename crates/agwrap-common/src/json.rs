//! Dotted-path access primitives over `serde_json::Value`.
//!
//! Payload translation in this project rewrites deeply nested JSON
//! documents where most fields pass through untouched, so the translators
//! and the executor address fields by path (`request.generationConfig.
//! thinkingConfig.thinkingBudget`) instead of materializing typed models
//! per schema. Segments are object keys, decimal array indices, or `-1`
//! to append to an array. `set` creates intermediate containers as
//! needed; every operation leaves the document well-formed.

use serde_json::{Map, Value};

/// Returns the value at `path`, if present.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn get_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path)?.as_str()
}

pub fn get_i64(root: &Value, path: &str) -> Option<i64> {
    get(root, path)?.as_i64()
}

pub fn get_f64(root: &Value, path: &str) -> Option<f64> {
    get(root, path)?.as_f64()
}

pub fn get_bool(root: &Value, path: &str) -> Option<bool> {
    get(root, path)?.as_bool()
}

pub fn exists(root: &Value, path: &str) -> bool {
    get(root, path).is_some()
}

/// Writes `value` at `path`, creating intermediate objects and arrays.
/// A numeric segment turns the node into an array and pads it with nulls
/// up to the index; `-1` appends.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segs: Vec<&str> = path.split('.').collect();
    set_inner(root, &segs, value);
}

fn set_inner(cur: &mut Value, segs: &[&str], value: Value) {
    let seg = segs[0];
    let rest = &segs[1..];

    if let Ok(idx) = seg.parse::<i64>() {
        if !cur.is_array() {
            *cur = Value::Array(Vec::new());
        }
        let arr = cur.as_array_mut().expect("just coerced to array");
        let idx = if idx < 0 { arr.len() } else { idx as usize };
        while arr.len() <= idx {
            arr.push(Value::Null);
        }
        if rest.is_empty() {
            arr[idx] = value;
        } else {
            set_inner(&mut arr[idx], rest, value);
        }
        return;
    }

    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    let map = cur.as_object_mut().expect("just coerced to object");
    if rest.is_empty() {
        map.insert(seg.to_string(), value);
    } else {
        let slot = map.entry(seg.to_string()).or_insert(Value::Null);
        set_inner(slot, rest, value);
    }
}

/// Appends `value` to the array at `path` (creating it if absent).
pub fn append(root: &mut Value, path: &str, value: Value) {
    set(root, &format!("{path}.-1"), value);
}

/// Removes the value at `path`. Returns whether anything was removed.
pub fn delete(root: &mut Value, path: &str) -> bool {
    let Some((parent_path, last)) = path.rsplit_once('.') else {
        return delete_child(root, path);
    };
    let Some(parent) = get_mut(root, parent_path) else {
        return false;
    };
    delete_child(parent, last)
}

fn delete_child(parent: &mut Value, seg: &str) -> bool {
    match parent {
        Value::Object(map) => map.remove(seg).is_some(),
        Value::Array(items) => match seg.parse::<usize>() {
            Ok(idx) if idx < items.len() => {
                items.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get_mut(seg)?,
            Value::Array(items) => {
                let idx = seg.parse::<usize>().ok()?;
                items.get_mut(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Moves the value at `old_path` to `new_path`.
pub fn rename(root: &mut Value, old_path: &str, new_path: &str) {
    let Some(value) = get(root, old_path).cloned() else {
        return;
    };
    set(root, new_path, value);
    delete(root, old_path);
}

/// Depth-first search for every object key equal to `key`, returning the
/// dotted paths of the occurrences (object keys in sorted order, array
/// elements in position order).
pub fn find_paths(root: &Value, key: &str) -> Vec<String> {
    let mut paths = Vec::new();
    walk(root, "", key, &mut paths);
    paths
}

fn walk(node: &Value, prefix: &str, key: &str, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                if k == key {
                    out.push(path.clone());
                }
                walk(v, &path, key, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{prefix}.{i}")
                };
                walk(item, &path, key, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_nested_objects() {
        let mut doc = json!({});
        set(
            &mut doc,
            "request.generationConfig.thinkingConfig.thinkingBudget",
            json!(512),
        );
        assert_eq!(
            get_i64(&doc, "request.generationConfig.thinkingConfig.thinkingBudget"),
            Some(512)
        );
    }

    #[test]
    fn set_indexes_and_pads_arrays() {
        let mut doc = json!({});
        set(&mut doc, "parts.1.text", json!("b"));
        assert_eq!(doc, json!({"parts": [null, {"text": "b"}]}));
    }

    #[test]
    fn append_with_negative_index() {
        let mut doc = json!({"contents": [{"role": "user"}]});
        set(&mut doc, "contents.-1", json!({"role": "model"}));
        assert_eq!(doc["contents"].as_array().unwrap().len(), 2);
        assert_eq!(get_str(&doc, "contents.1.role"), Some("model"));

        let mut empty = json!({});
        append(&mut empty, "parts", json!({"text": "hi"}));
        assert_eq!(get_str(&empty, "parts.0.text"), Some("hi"));
    }

    #[test]
    fn delete_object_key_and_array_element() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "arr": [1, 2, 3]});
        assert!(delete(&mut doc, "a.b"));
        assert!(!delete(&mut doc, "a.b"));
        assert!(delete(&mut doc, "arr.1"));
        assert_eq!(doc, json!({"a": {"c": 2}, "arr": [1, 3]}));
    }

    #[test]
    fn delete_top_level() {
        let mut doc = json!({"a": 1, "b": 2});
        assert!(delete(&mut doc, "a"));
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn rename_moves_subtree() {
        let mut doc = json!({"fn": {"parameters": {"type": "object"}}});
        rename(&mut doc, "fn.parameters", "fn.parametersJsonSchema");
        assert_eq!(
            doc,
            json!({"fn": {"parametersJsonSchema": {"type": "object"}}})
        );
    }

    #[test]
    fn find_paths_descends_objects_and_arrays() {
        let doc = json!({
            "tools": [
                {"functionDeclarations": [{"parametersJsonSchema": {"anyOf": [1]}}]},
            ],
            "anyOf": true,
        });
        let mut paths = find_paths(&doc, "anyOf");
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "anyOf".to_string(),
                "tools.0.functionDeclarations.0.parametersJsonSchema.anyOf".to_string(),
            ]
        );
    }

    #[test]
    fn get_through_array_index() {
        let doc = json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        assert_eq!(get_str(&doc, "candidates.0.content.parts.0.text"), Some("hi"));
        assert!(get(&doc, "candidates.1").is_none());
    }
}
