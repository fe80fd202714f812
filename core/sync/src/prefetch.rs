//! Batched node fetching and the shared prefetch snapshot.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use exfig_common::{Error, ItemId, Result, SourceId};
use exfig_remote::{RemoteClient, RemoteDocument};

/// Item IDs sent per node request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Node requests allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 3;

/// Batching policy for node requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Maximum item IDs per request.
    pub batch_size: usize,
    /// Maximum requests in flight. Fixed; never derived from input size.
    pub max_concurrent: usize,
}

impl FetchPolicy {
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_BATCHES)
    }
}

/// Fetch documents for `item_ids` in fixed-size batches with bounded concurrency.
///
/// Duplicate IDs are requested once. IDs the remote does not know are
/// absent from the result.
pub async fn fetch_batched(
    client: &dyn RemoteClient,
    source_id: &SourceId,
    item_ids: &[ItemId],
    policy: FetchPolicy,
) -> Result<HashMap<ItemId, RemoteDocument>> {
    let mut seen = HashSet::new();
    let unique: Vec<ItemId> = item_ids
        .iter()
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect();

    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let batches: Vec<&[ItemId]> = unique.chunks(policy.batch_size.max(1)).collect();
    debug!(
        "Fetching {} nodes of {} in {} batches",
        unique.len(),
        source_id,
        batches.len()
    );

    let limiter = Semaphore::new(policy.max_concurrent.max(1));
    let limiter = &limiter;
    let requests = batches.into_iter().map(move |batch| async move {
        // Held until the request completes.
        let _permit = limiter
            .acquire()
            .await
            .map_err(|e| Error::Remote(format!("fetch limiter closed: {}", e)))?;
        client.fetch_nodes(source_id, batch).await
    });

    let responses = try_join_all(requests).await?;
    Ok(responses.into_iter().flatten().collect())
}

/// Node documents fetched once, up front, for a batch run.
///
/// Built by a single owner before any consumer starts and never mutated
/// afterwards, so it can be shared behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct PrefetchSnapshot {
    documents: HashMap<SourceId, HashMap<ItemId, RemoteDocument>>,
}

impl PrefetchSnapshot {
    pub fn from_documents(documents: HashMap<SourceId, HashMap<ItemId, RemoteDocument>>) -> Self {
        Self { documents }
    }

    /// Fetch every requested ID of every source and freeze the result.
    ///
    /// Sources are fetched one after another; each source's batches obey
    /// `policy`, so the concurrency ceiling holds for the whole population.
    pub async fn populate(
        client: &dyn RemoteClient,
        requests: &HashMap<SourceId, Vec<ItemId>>,
        policy: FetchPolicy,
    ) -> Result<Self> {
        let mut documents = HashMap::new();
        for (source_id, item_ids) in requests {
            let fetched = fetch_batched(client, source_id, item_ids, policy).await?;
            documents.insert(source_id.clone(), fetched);
        }

        let snapshot = Self { documents };
        info!(
            "Prefetched {} node documents across {} sources",
            snapshot.len(),
            snapshot.source_count()
        );
        Ok(snapshot)
    }

    pub fn get(&self, source_id: &SourceId, item_id: &ItemId) -> Option<&RemoteDocument> {
        self.documents.get(source_id).and_then(|docs| docs.get(item_id))
    }

    pub fn contains_source(&self, source_id: &SourceId) -> bool {
        self.documents.contains_key(source_id)
    }

    pub fn source_count(&self) -> usize {
        self.documents.len()
    }

    /// Total number of documents across all sources.
    pub fn len(&self) -> usize {
        self.documents.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves node documents from the snapshot when one exists, and from the
/// remote otherwise.
#[derive(Clone)]
pub struct PrefetchCoordinator {
    client: Arc<dyn RemoteClient>,
    snapshot: Option<Arc<PrefetchSnapshot>>,
    policy: FetchPolicy,
}

impl PrefetchCoordinator {
    pub fn new(client: Arc<dyn RemoteClient>, policy: FetchPolicy) -> Self {
        Self {
            client,
            snapshot: None,
            policy,
        }
    }

    /// Attach a populated snapshot for this run.
    pub fn with_snapshot(mut self, snapshot: Arc<PrefetchSnapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn snapshot(&self) -> Option<&Arc<PrefetchSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    /// Documents for `item_ids`.
    ///
    /// Snapshot hits are served locally; only the misses go to the remote,
    /// and what they return is merged into the caller's result rather than
    /// the shared snapshot.
    pub async fn resolve(
        &self,
        source_id: &SourceId,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, RemoteDocument>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let Some(snapshot) = &self.snapshot else {
            return fetch_batched(self.client.as_ref(), source_id, item_ids, self.policy).await;
        };

        let mut resolved = HashMap::with_capacity(item_ids.len());
        let mut missing = Vec::new();
        for item_id in item_ids {
            match snapshot.get(source_id, item_id) {
                Some(document) => {
                    resolved.insert(item_id.clone(), document.clone());
                }
                None => missing.push(item_id.clone()),
            }
        }

        if !missing.is_empty() {
            debug!(
                "Prefetch snapshot missed {} of {} nodes for {}",
                missing.len(),
                item_ids.len(),
                source_id
            );
            let fetched =
                fetch_batched(self.client.as_ref(), source_id, &missing, self.policy).await?;
            resolved.extend(fetched);
        }

        Ok(resolved)
    }
}
