//! Granular, per-item change detection.

use std::collections::HashMap;
use tracing::{debug, warn};

use exfig_common::{ItemId, Result, SourceId};

use crate::hasher::{ContentHasher, SENTINEL_FINGERPRINT};
use crate::node_index::NodeHashIndex;
use crate::prefetch::PrefetchCoordinator;

/// Outcome of a change-detection pass over one source.
#[derive(Debug, Clone)]
pub struct ChangeSet<T> {
    /// Candidates whose content differs from the last export.
    pub changed: HashMap<ItemId, T>,
    /// Fresh fingerprints for every candidate, changed or not.
    ///
    /// Persist the whole map after a successful export so the next diff runs
    /// against current content.
    pub fingerprints: HashMap<ItemId, String>,
}

impl<T> ChangeSet<T> {
    pub fn empty() -> Self {
        Self {
            changed: HashMap::new(),
            fingerprints: HashMap::new(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn unchanged_count(&self) -> usize {
        self.fingerprints.len().saturating_sub(self.changed.len())
    }
}

/// Partitions candidate items into changed and unchanged.
///
/// Reads the node index but never writes it; callers merge
/// [`ChangeSet::fingerprints`] only after the export succeeded.
pub struct ChangeDetector<'a> {
    prefetch: &'a PrefetchCoordinator,
    index: &'a NodeHashIndex,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(prefetch: &'a PrefetchCoordinator, index: &'a NodeHashIndex) -> Self {
        Self { prefetch, index }
    }

    /// Detect which of `candidates` changed since the last export of `source_id`.
    ///
    /// A candidate whose document the remote does not return is reported as
    /// changed with the sentinel fingerprint.
    ///
    /// # Errors
    /// - Remote failures while resolving documents
    pub async fn detect<T>(
        &self,
        source_id: &SourceId,
        candidates: HashMap<ItemId, T>,
    ) -> Result<ChangeSet<T>> {
        if candidates.is_empty() {
            return Ok(ChangeSet::empty());
        }

        let item_ids: Vec<ItemId> = candidates.keys().cloned().collect();
        let documents = self.prefetch.resolve(source_id, &item_ids).await?;

        let mut changed = HashMap::new();
        let mut fingerprints = HashMap::with_capacity(candidates.len());

        for (item_id, item) in candidates {
            let fingerprint = match documents.get(&item_id) {
                Some(document) => ContentHasher::hash_document(document),
                None => {
                    warn!("No remote document for {} in {}, treating as changed", item_id, source_id);
                    SENTINEL_FINGERPRINT.to_string()
                }
            };

            if self.index.is_changed(source_id, &item_id, &fingerprint) {
                changed.insert(item_id.clone(), item);
            }
            fingerprints.insert(item_id, fingerprint);
        }

        debug!(
            "{}: {} of {} items changed",
            source_id,
            changed.len(),
            fingerprints.len()
        );

        Ok(ChangeSet {
            changed,
            fingerprints,
        })
    }
}
