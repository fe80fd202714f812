//! In-memory remote client for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use exfig_common::{Error, ItemId, Result, SourceId};

use crate::client::{RemoteClient, RemoteDocument, VersionInfo};

/// A recorded `fetch_nodes` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    pub source_id: SourceId,
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Clone)]
struct MemorySource {
    version: String,
    name: Option<String>,
    nodes: HashMap<ItemId, RemoteDocument>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sources: HashMap<SourceId, MemorySource>,
    failing: HashSet<SourceId>,
    node_requests: Vec<NodeRequest>,
    version_requests: Vec<SourceId>,
}

/// In-memory remote client.
///
/// Useful for testing and development. Every request is recorded so callers
/// can assert how many round trips the engine made and which IDs it asked for.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    /// Create a new empty memory remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a source (or replace its version and name).
    pub fn insert_source(&self, source_id: &SourceId, version: impl Into<String>, name: Option<&str>) {
        let mut state = self.lock();
        let source = state
            .sources
            .entry(source_id.clone())
            .or_insert_with(|| MemorySource {
                version: String::new(),
                name: None,
                nodes: HashMap::new(),
            });
        source.version = version.into();
        source.name = name.map(String::from);
    }

    /// Bump the version of an existing source.
    pub fn set_version(&self, source_id: &SourceId, version: impl Into<String>) {
        if let Some(source) = self.lock().sources.get_mut(source_id) {
            source.version = version.into();
        }
    }

    /// Insert or replace a node document, creating the source if needed.
    pub fn insert_node(&self, source_id: &SourceId, document: RemoteDocument) {
        let mut state = self.lock();
        let source = state
            .sources
            .entry(source_id.clone())
            .or_insert_with(|| MemorySource {
                version: "1".to_string(),
                name: None,
                nodes: HashMap::new(),
            });
        source.nodes.insert(document.id.clone(), document);
    }

    /// Make every request against `source_id` fail with a remote error.
    pub fn fail_source(&self, source_id: &SourceId) {
        self.lock().failing.insert(source_id.clone());
    }

    /// All recorded node requests, in call order.
    pub fn node_requests(&self) -> Vec<NodeRequest> {
        self.lock().node_requests.clone()
    }

    pub fn node_request_count(&self) -> usize {
        self.lock().node_requests.len()
    }

    pub fn version_request_count(&self) -> usize {
        self.lock().version_requests.len()
    }

    /// Forget recorded requests.
    pub fn reset_counters(&self) {
        let mut state = self.lock();
        state.node_requests.clear();
        state.version_requests.clear();
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_nodes(
        &self,
        source_id: &SourceId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, RemoteDocument>> {
        let mut state = self.lock();
        state.node_requests.push(NodeRequest {
            source_id: source_id.clone(),
            item_ids: item_ids.to_vec(),
        });

        if state.failing.contains(source_id) {
            return Err(Error::Remote(format!("node request failed for {}", source_id)));
        }

        let source = state
            .sources
            .get(source_id)
            .ok_or_else(|| Error::Remote(format!("Unknown source: {}", source_id)))?;

        let found: HashMap<ItemId, RemoteDocument> = item_ids
            .iter()
            .filter_map(|id| source.nodes.get(id).map(|doc| (id.clone(), doc.clone())))
            .collect();

        debug!("memory remote served {}/{} nodes for {}", found.len(), item_ids.len(), source_id);
        Ok(found)
    }

    async fn fetch_version(&self, source_id: &SourceId) -> Result<VersionInfo> {
        let mut state = self.lock();
        state.version_requests.push(source_id.clone());

        if state.failing.contains(source_id) {
            return Err(Error::Remote(format!("version request failed for {}", source_id)));
        }

        let source = state
            .sources
            .get(source_id)
            .ok_or_else(|| Error::Remote(format!("Unknown source: {}", source_id)))?;

        Ok(VersionInfo {
            source_id: source_id.clone(),
            version: source.version.clone(),
            name: source.name.clone(),
            last_modified: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceId {
        SourceId::new("design-file").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_version() {
        let remote = MemoryRemote::new();
        remote.insert_source(&source(), "v7", Some("Icons"));

        let info = remote.fetch_version(&source()).await.unwrap();
        assert_eq!(info.version, "v7");
        assert_eq!(info.name.as_deref(), Some("Icons"));
        assert_eq!(remote.version_request_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_nodes_omits_unknown_ids() {
        let remote = MemoryRemote::new();
        remote.insert_node(&source(), RemoteDocument::new("1:1", "ic/home", "COMPONENT"));

        let ids = vec![ItemId::from("1:1"), ItemId::from("9:9")];
        let nodes = remote.fetch_nodes(&source(), &ids).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert!(nodes.contains_key("1:1"));
        assert_eq!(remote.node_requests()[0].item_ids, ids);
    }

    #[tokio::test]
    async fn test_failing_source() {
        let remote = MemoryRemote::new();
        remote.insert_source(&source(), "v1", None);
        remote.fail_source(&source());

        let err = remote.fetch_version(&source()).await.unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_unknown_source_is_remote_error() {
        let remote = MemoryRemote::new();
        let err = remote.fetch_nodes(&source(), &[]).await.unwrap_err();
        assert!(err.is_remote());
    }
}
