//! Remote design-source client trait and wire types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use exfig_common::{ItemId, Result, SourceId};

/// Version marker of a remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Source the version belongs to.
    pub source_id: SourceId,
    /// Opaque, unordered version identifier.
    pub version: String,
    /// Human readable source name, if the remote reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Last modification time reported by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// RGBA color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }
}

/// A fill or stroke paint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paint {
    /// Paint type as reported by the remote (e.g. "SOLID", "IMAGE").
    #[serde(rename = "type")]
    pub paint_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Paint {
    /// A visible solid paint.
    pub fn solid(color: Color) -> Self {
        Self {
            paint_type: "SOLID".to_string(),
            color: Some(color),
            opacity: None,
            visible: true,
        }
    }
}

/// Absolute bounding box of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Remote document describing a single design node and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: ItemId,
    pub name: String,
    /// Node type as reported by the remote (e.g. "COMPONENT", "VECTOR").
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default)]
    pub fills: Vec<Paint>,
    #[serde(default)]
    pub strokes: Vec<Paint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_weight: Option<f64>,
    #[serde(default, rename = "absoluteBoundingBox", skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub children: Vec<RemoteDocument>,
}

fn default_visible() -> bool {
    true
}

impl RemoteDocument {
    /// Create a bare visible node with no paints or children.
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            description: None,
            visible: true,
            opacity: None,
            fills: Vec::new(),
            strokes: Vec::new(),
            stroke_weight: None,
            bounds: None,
            children: Vec::new(),
        }
    }

    pub fn with_fill(mut self, paint: Paint) -> Self {
        self.fills.push(paint);
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_child(mut self, child: RemoteDocument) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Request-capable collaborator for the remote design source.
///
/// Retries, backoff and rate limiting are the implementation's concern;
/// the sync engine treats every error returned here as final.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Get the client name (e.g., "figma", "memory").
    fn name(&self) -> &str;

    /// Fetch node documents for a batch of item IDs within a source.
    ///
    /// # Postconditions
    /// - Returned map contains at most the requested IDs
    /// - IDs unknown to the remote are omitted rather than reported as errors
    ///
    /// # Errors
    /// - Network/API errors
    async fn fetch_nodes(
        &self,
        source_id: &SourceId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, RemoteDocument>>;

    /// Fetch the current version marker of a source.
    ///
    /// # Errors
    /// - Source not found
    /// - Network/API errors
    async fn fetch_version(&self, source_id: &SourceId) -> Result<VersionInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_deserializes_remote_shape() {
        let json = r#"{
            "id": "12:7",
            "name": "ic/arrow",
            "type": "COMPONENT",
            "fills": [{"type": "SOLID", "color": {"r": 1.0, "g": 0.5, "b": 0.0, "a": 1.0}}],
            "absoluteBoundingBox": {"x": 0.0, "y": 16.0, "width": 24.0, "height": 24.0}
        }"#;

        let doc: RemoteDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id.as_str(), "12:7");
        assert_eq!(doc.node_type, "COMPONENT");
        assert!(doc.visible);
        assert_eq!(doc.fills.len(), 1);
        assert!(doc.fills[0].visible);
        assert_eq!(doc.bounds.unwrap().y, 16.0);
        assert!(doc.children.is_empty());
    }

    #[test]
    fn test_version_info_serialization() {
        let info = VersionInfo {
            source_id: SourceId::new("file").unwrap(),
            version: "42".to_string(),
            name: None,
            last_modified: None,
        };

        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"sourceId":"file","version":"42"}"#);
    }
}
