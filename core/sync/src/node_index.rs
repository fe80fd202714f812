//! Per-item fingerprint index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use exfig_common::{ItemId, SourceId};

use crate::hasher::ContentHasher;

/// Last exported fingerprint of every item, grouped by source.
///
/// Entries for items that were deleted remotely are never pruned; they are
/// simply never looked up again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHashIndex {
    sources: BTreeMap<SourceId, BTreeMap<ItemId, String>>,
}

impl NodeHashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored fingerprint for one item.
    pub fn get(&self, source_id: &SourceId, item_id: &ItemId) -> Option<&str> {
        self.sources
            .get(source_id)
            .and_then(|items| items.get(item_id))
            .map(String::as_str)
    }

    /// All stored fingerprints for a source.
    pub fn hashes_for(&self, source_id: &SourceId) -> Option<&BTreeMap<ItemId, String>> {
        self.sources.get(source_id)
    }

    /// Copy of just one source's fingerprints.
    pub fn for_source(&self, source_id: &SourceId) -> NodeHashIndex {
        let mut subset = NodeHashIndex::new();
        if let Some(items) = self.sources.get(source_id) {
            subset.sources.insert(source_id.clone(), items.clone());
        }
        subset
    }

    /// Whether `fresh` differs from what was last exported for this item.
    ///
    /// Items never seen before, and items whose fresh fingerprint is the
    /// sentinel, always count as changed.
    pub fn is_changed(&self, source_id: &SourceId, item_id: &ItemId, fresh: &str) -> bool {
        if ContentHasher::is_sentinel(fresh) {
            return true;
        }
        self.get(source_id, item_id) != Some(fresh)
    }

    /// Merge freshly computed fingerprints into a source's map.
    ///
    /// Existing entries for other items are kept. Sentinel fingerprints are
    /// skipped so a failed hash is retried on the next run. Returns the
    /// number of entries written.
    pub fn merge(&mut self, source_id: &SourceId, fingerprints: &HashMap<ItemId, String>) -> usize {
        let items = self.sources.entry(source_id.clone()).or_default();
        let mut written = 0;
        for (item_id, fingerprint) in fingerprints {
            if ContentHasher::is_sentinel(fingerprint) {
                continue;
            }
            items.insert(item_id.clone(), fingerprint.clone());
            written += 1;
        }
        if items.is_empty() {
            self.sources.remove(source_id);
        }
        written
    }

    /// Drop every fingerprint of a source.
    pub fn remove_source(&mut self, source_id: &SourceId) -> Option<BTreeMap<ItemId, String>> {
        self.sources.remove(source_id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Total number of stored fingerprints.
    pub fn len(&self) -> usize {
        self.sources.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
