//! File-level version cache and its persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use exfig_common::{Result, SourceId};

use crate::node_index::NodeHashIndex;
use crate::persist;

/// Default cache file name, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = ".exfig-cache.json";

/// Schema version written to and expected from the cache file.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Last successfully exported version of one remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersionRecord {
    /// Remote version identifier at export time.
    pub version: String,
    /// When the export finished.
    #[serde(rename = "lastExport")]
    pub last_export: DateTime<Utc>,
    /// Source display name; an empty string is kept as-is.
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Persisted record of what has already been exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCacheStore {
    schema_version: u32,
    files: BTreeMap<SourceId, FileVersionRecord>,
    #[serde(default, skip_serializing_if = "NodeHashIndex::is_empty")]
    node_hashes: NodeHashIndex,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaProbe {
    schema_version: Option<u32>,
}

impl VersionCacheStore {
    /// Create an empty store at the current schema version.
    pub fn new() -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            files: BTreeMap::new(),
            node_hashes: NodeHashIndex::new(),
        }
    }

    /// Whether `source_id` must be exported given its current remote version.
    ///
    /// Versions are compared for plain equality; they carry no ordering.
    pub fn needs_export(&self, source_id: &SourceId, remote_version: &str) -> bool {
        match self.files.get(source_id) {
            Some(record) => record.version != remote_version,
            None => true,
        }
    }

    /// Record a successful export of `source_id` at `remote_version`.
    pub fn update(
        &mut self,
        source_id: &SourceId,
        remote_version: impl Into<String>,
        display_name: Option<String>,
    ) {
        self.files.insert(
            source_id.clone(),
            FileVersionRecord {
                version: remote_version.into(),
                last_export: Utc::now(),
                display_name,
            },
        );
    }

    pub fn record(&self, source_id: &SourceId) -> Option<&FileVersionRecord> {
        self.files.get(source_id)
    }

    /// Forget a source entirely, including its node fingerprints.
    pub fn remove(&mut self, source_id: &SourceId) -> Option<FileVersionRecord> {
        self.node_hashes.remove_source(source_id);
        self.files.remove(source_id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&SourceId, &FileVersionRecord)> {
        self.files.iter()
    }

    pub fn node_hashes(&self) -> &NodeHashIndex {
        &self.node_hashes
    }

    pub fn node_hashes_mut(&mut self) -> &mut NodeHashIndex {
        &mut self.node_hashes
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.node_hashes.is_empty()
    }

    /// Load the store from `path`.
    ///
    /// Never fails: a missing file yields an empty store, and an unreadable,
    /// undecodable or schema-mismatched file is discarded with a log line.
    pub async fn load(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No version cache at {}, starting empty", path.display());
                return Self::new();
            }
            Err(e) => {
                info!("cache reset: unreadable cache file {}: {}", path.display(), e);
                return Self::new();
            }
        };

        match Self::from_slice(&bytes) {
            Some(store) => {
                debug!("Loaded version cache with {} sources", store.len());
                store
            }
            None => Self::new(),
        }
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let probe: SchemaProbe = match serde_json::from_slice(bytes) {
            Ok(probe) => probe,
            Err(e) => {
                info!("cache reset: unreadable cache file: {}", e);
                return None;
            }
        };

        if probe.schema_version != Some(CACHE_SCHEMA_VERSION) {
            info!(
                "cache reset: schema mismatch (found {:?}, expected {})",
                probe.schema_version, CACHE_SCHEMA_VERSION
            );
            return None;
        }

        match serde_json::from_slice(bytes) {
            Ok(store) => Some(store),
            Err(e) => {
                info!("cache reset: unreadable cache file: {}", e);
                None
            }
        }
    }

    /// Persist the store atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self).await?;
        debug!("Saved version cache with {} sources to {}", self.len(), path.display());
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for VersionCacheStore {
    fn default() -> Self {
        Self::new()
    }
}
