//! Identifier types shared across the exfig sync crates.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a remote design source (e.g. a design file key).
///
/// Source IDs are opaque; the only requirement is that they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Create a new SourceId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "SourceId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = crate::Error;

    fn try_from(id: String) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl Borrow<str> for SourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of an individually exportable item (node) within a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for ItemId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_source_id_creation() {
        let id = SourceId::new("abc123").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn test_source_id_empty_fails() {
        assert!(SourceId::new("").is_err());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let mut map = HashMap::new();
        map.insert(ItemId::from("1:2"), 7u32);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"1:2":7}"#);

        let id: SourceId = serde_json::from_str(r#""file-key""#).unwrap();
        assert_eq!(id.as_str(), "file-key");
    }

    #[test]
    fn test_empty_source_id_rejected_on_deserialize() {
        assert!(serde_json::from_str::<SourceId>(r#""""#).is_err());

        let map: Result<HashMap<SourceId, u32>, _> = serde_json::from_str(r#"{"": 1}"#);
        assert!(map.is_err());

        let id = SourceId::new("k").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""k""#);
    }

    #[test]
    fn test_item_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ItemId::new("10:1"), "icon");
        assert_eq!(map.get("10:1"), Some(&"icon"));
    }
}
