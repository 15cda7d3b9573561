use super::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field path to value mapping of a stored document.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Slash-separated document path: `collection/id[/subcollection/id...]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocPath(String);

impl DocPath {
    /// Builds a top-level document path.
    pub fn new(collection: &str, id: &str) -> Result<Self> {
        Self::root().child(collection, id)
    }

    fn root() -> Self {
        Self(String::new())
    }

    /// Builds the path of a document inside a subcollection of this one.
    pub fn child(&self, collection: &str, id: &str) -> Result<Self> {
        validate_segment(collection)?;
        validate_segment(id)?;
        if self.0.is_empty() {
            Ok(Self(format!("{collection}/{id}")))
        } else {
            Ok(Self(format!("{}/{collection}/{id}", self.0)))
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() < 2 || segments.len() % 2 != 0 {
            return Err(CoreError::InvalidInput(format!(
                "document path '{raw}' must have an even number of segments"
            )));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment: the document id.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Second-to-last segment: the collection this document lives in.
    pub fn collection_id(&self) -> &str {
        self.0.rsplit('/').nth(1).unwrap_or_default()
    }

    /// Path of the document that owns the subcollection containing this one.
    pub fn parent_document(&self) -> Option<DocPath> {
        let mut segments: Vec<&str> = self.0.split('/').collect();
        if segments.len() < 4 {
            return None;
        }
        segments.truncate(segments.len() - 2);
        Some(Self(segments.join("/")))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.trim().is_empty() || segment.contains('/') {
        return Err(CoreError::InvalidInput(format!(
            "invalid document path segment '{segment}'"
        )));
    }
    Ok(())
}

/// Opaque value that changes on every successful write of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FencingToken(u64);

impl FencingToken {
    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
