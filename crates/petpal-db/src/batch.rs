use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::Value;

use crate::paths::DocPath;

/// A set of path writes committed as one indivisible operation.
/// `None` deletes whatever is stored at the path.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteBatch {
    entries: BTreeMap<String, Option<Value>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.entries.insert(path.into(), Some(value));
        self
    }

    pub fn set_json<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> Result<&mut Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(path, value))
    }

    pub fn delete(&mut self, path: impl Into<String>) -> &mut Self {
        self.entries.insert(path.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parse every path and reject batches where one path is another's
    /// ancestor (or the same path spelled twice).
    pub fn validated(&self) -> Result<Vec<(DocPath, Option<Value>)>> {
        let mut parsed: Vec<(DocPath, Option<Value>)> = self
            .entries
            .iter()
            .map(|(raw, value)| Ok((DocPath::parse(raw)?, value.clone())))
            .collect::<Result<_>>()?;

        // Sorted by segments, an ancestor is always directly followed by one of its descendants.
        parsed.sort_by(|a, b| a.0.cmp(&b.0));
        for pair in parsed.windows(2) {
            if pair[0].0.contains(&pair[1].0) {
                bail!("overlapping paths in one write: '{}' and '{}'", pair[0].0, pair[1].0);
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlapping_paths_rejected() {
        let mut batch = WriteBatch::new();
        batch
            .set("posts/p1", json!({"content": "x"}))
            .delete("posts/p1/likes/u1");
        assert!(batch.validated().is_err());
    }

    #[test]
    fn test_same_path_two_spellings_rejected() {
        let mut batch = WriteBatch::new();
        batch.set("posts/p1/content", json!("a")).set("/posts/p1/content/", json!("b"));
        assert!(batch.validated().is_err());
    }

    #[test]
    fn test_siblings_accepted() {
        let mut batch = WriteBatch::new();
        batch
            .set("users/u1/following/u2", json!(true))
            .set("users/u2/followers/u1", json!(true))
            .set("users/u1x", json!({"name": "x"}));
        assert_eq!(batch.validated().unwrap().len(), 3);
    }
}
