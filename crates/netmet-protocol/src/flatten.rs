//! Nested-to-dotted-key flattening for the Store Adapter (spec §4.9):
//! `{"client_src": {"host": "h1"}}` becomes `{"client_src.host": "h1"}`
//! before indexing, and back on read. `unflatten(flatten(x)) == x` for any
//! non-cyclic JSON object (spec §8's round-trip law).

use serde_json::{Map, Value};

/// Flattens a JSON object's nested objects into dotted keys. Arrays are
/// treated as leaves (Elasticsearch's own nested-array semantics apply
/// unchanged; NetMet never nests arrays of objects inside a flattened doc).
pub fn flatten(value: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(map) = value {
        flatten_into(map, String::new(), &mut out);
    } else {
        return value.clone();
    }
    Value::Object(out)
}

fn flatten_into(map: &Map<String, Value>, prefix: String, out: &mut Map<String, Value>) {
    for (key, val) in map {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, full_key, out),
            _ => {
                out.insert(full_key, val.clone());
            }
        }
    }
}

/// Inverse of [`flatten`]: re-nests dotted keys into objects.
pub fn unflatten(value: &Value) -> Value {
    let mut root = Map::new();
    if let Value::Object(map) = value {
        for (key, val) in map {
            insert_nested(&mut root, key, val.clone());
        }
    } else {
        return value.clone();
    }
    Value::Object(root)
}

fn insert_nested(root: &mut Map<String, Value>, dotted_key: &str, value: Value) {
    let mut parts = dotted_key.split('.');
    let first = parts.next().unwrap();
    let rest: Vec<&str> = parts.collect();

    if rest.is_empty() {
        root.insert(first.to_string(), value);
        return;
    }

    let entry = root
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(nested) = entry {
        insert_nested(nested, &rest.join("."), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_one_level_of_nesting() {
        let nested = json!({"client_src": {"host": "h1", "az": "a"}, "protocol": "icmp"});
        let flat = flatten(&nested);
        assert_eq!(flat["client_src.host"], "h1");
        assert_eq!(flat["client_src.az"], "a");
        assert_eq!(flat["protocol"], "icmp");
    }

    #[test]
    fn round_trips_deeply_nested_objects() {
        let nested = json!({
            "client_src": {"host": "h1", "nested": {"deep": 1}},
            "client_dest": {"host": "h2"},
            "latency": {"min": 1.0, "max": 2.0, "avg": 1.5},
            "ret_code": 0
        });
        assert_eq!(unflatten(&flatten(&nested)), nested);
    }

    #[test]
    fn round_trips_flat_objects_unchanged() {
        let flat = json!({"a": 1, "b": "x"});
        assert_eq!(unflatten(&flatten(&flat)), flat);
    }

    #[test]
    fn empty_nested_object_round_trips_as_empty_object() {
        let nested = json!({"tags": {}});
        assert_eq!(unflatten(&flatten(&nested)), nested);
    }
}
