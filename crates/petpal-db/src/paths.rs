use std::fmt;

use anyhow::{Result, bail};

/// Characters the store refuses inside a path segment.
const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// A validated, `/`-separated store path.
///
/// Depth 1 addresses a collection (`posts`), depth 2 a document
/// (`posts/p1`) and anything deeper a field inside that document
/// (`posts/p1/likes/u2`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            bail!("root path is not addressable");
        }

        let mut segments = Vec::new();
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                bail!("empty segment in path '{}'", raw);
            }
            if seg.contains(FORBIDDEN) || seg.chars().any(char::is_control) {
                bail!("invalid segment '{}' in path '{}'", seg, raw);
            }
            segments.push(seg.to_string());
        }

        Ok(Self { segments })
    }

    pub fn collection(&self) -> &str {
        &self.segments[0]
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    /// Segments below the document, empty for collection and document paths.
    pub fn field(&self) -> &[String] {
        self.segments.get(2..).unwrap_or(&[])
    }

    pub fn child(&self, segment: &str) -> Result<Self> {
        Self::parse(&format!("{}/{}", self, segment))
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &DocPath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Two paths overlap when a write to one can change what a read of the other returns.
    pub fn overlaps(&self, other: &DocPath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
