//! Serde adapter for membership sets stored as `{ "<uid>": true }` maps.
//!
//! Use with `#[serde(default, with = "crate::sets")]`. Entries whose value is
//! `null` or `false` are treated as absent, matching how the store prunes
//! cleared members.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

pub fn serialize<S>(set: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(set.len()))?;
    for member in set {
        map.serialize_entry(member, &true)?;
    }
    map.end()
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
        .map(|(k, _)| k)
        .collect())
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(default, with = "crate::sets")]
        likes: BTreeSet<String>,
    }

    #[test]
    fn test_false_and_null_members_are_dropped() {
        let h: Holder =
            serde_json::from_str(r#"{"likes":{"u1":true,"u2":false,"u3":null}}"#).unwrap();
        assert_eq!(h.likes.into_iter().collect::<Vec<_>>(), vec!["u1".to_string()]);
    }

    #[test]
    fn test_missing_set_defaults_empty() {
        let h: Holder = serde_json::from_str("{}").unwrap();
        assert!(h.likes.is_empty());
    }

    #[test]
    fn test_serializes_as_true_map() {
        let h = Holder {
            likes: ["u2".to_string()].into_iter().collect(),
        };
        assert_eq!(serde_json::to_string(&h).unwrap(), r#"{"likes":{"u2":true}}"#);
    }
}
