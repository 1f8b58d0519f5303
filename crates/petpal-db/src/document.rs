//! Pure helpers for editing a document body as a JSON tree.

use serde_json::{Map, Value};

pub fn get_in<'a>(body: &'a Value, field: &[String]) -> Option<&'a Value> {
    field.iter().try_fold(body, |node, key| node.get(key))
}

/// Set `value` at `field`, turning any non-object on the way into an object.
pub fn set_in(body: &mut Value, field: &[String], value: Value) {
    let Some((last, parents)) = field.split_last() else {
        *body = value;
        return;
    };

    let mut node = body;
    for key in parents {
        node = object_mut(node)
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(node).insert(last.clone(), value);
}

pub fn remove_in(body: &mut Value, field: &[String]) {
    let Some((last, parents)) = field.split_last() else {
        *body = Value::Null;
        return;
    };

    let mut node = body;
    for key in parents {
        match node.get_mut(key) {
            Some(next) => node = next,
            None => return,
        }
    }
    if let Value::Object(map) = node {
        map.remove(last);
    }
}

/// Drop nulls and empty objects, bottom-up. `None` means nothing is left to store.
pub fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Object(kept))
            }
        }
        other => Some(other),
    }
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(s: &str) -> Vec<String> {
        s.split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut body = json!({"content": "hi"});
        set_in(&mut body, &field("likes/u2"), json!(true));
        assert_eq!(body, json!({"content": "hi", "likes": {"u2": true}}));
        assert_eq!(get_in(&body, &field("likes/u2")), Some(&json!(true)));
    }

    #[test]
    fn test_remove_then_prune_drops_empty_parent() {
        let mut body = json!({"content": "hi", "likes": {"u2": true}});
        remove_in(&mut body, &field("likes/u2"));
        assert_eq!(prune(body), Some(json!({"content": "hi"})));
    }

    #[test]
    fn test_prune_everything() {
        assert_eq!(prune(json!({"a": {"b": null}, "c": {}})), None);
        assert_eq!(prune(json!(0)), Some(json!(0)));
    }
}
