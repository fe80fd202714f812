//! Sync engine that coordinates caching, change detection and checkpoints.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use exfig_common::{ItemId, Result, SourceId};
use exfig_remote::RemoteClient;

use crate::cache::{VersionCacheStore, DEFAULT_CACHE_FILE};
use crate::checkpoint::{CategoryItems, ItemCategory, DEFAULT_CHECKPOINT_TTL};
use crate::decision::{CacheMode, SyncDecision};
use crate::detector::{ChangeDetector, ChangeSet};
use crate::prefetch::{
    FetchPolicy, PrefetchCoordinator, PrefetchSnapshot, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_CONCURRENT_BATCHES,
};
use crate::tracker::{CheckpointTracker, TrackerOptions, DEFAULT_FLUSH_THRESHOLD};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// How much caching to use.
    pub cache_mode: CacheMode,
    /// Location of the version cache file.
    pub cache_path: PathBuf,
    /// Directory holding the export checkpoint.
    pub checkpoint_dir: PathBuf,
    /// Age after which a checkpoint is discarded.
    pub checkpoint_ttl_secs: u64,
    /// Single completions between checkpoint writes.
    pub flush_threshold: usize,
    /// Item IDs per node request.
    pub batch_size: usize,
    /// Node requests in flight at once.
    pub max_concurrent_batches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::default(),
            cache_path: PathBuf::from(DEFAULT_CACHE_FILE),
            checkpoint_dir: PathBuf::from("."),
            checkpoint_ttl_secs: DEFAULT_CHECKPOINT_TTL.as_secs(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
        }
    }
}

impl SyncConfig {
    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_checkpoint_ttl(mut self, ttl: Duration) -> Self {
        self.checkpoint_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.batch_size = policy.batch_size;
        self.max_concurrent_batches = policy.max_concurrent;
        self
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy::new(self.batch_size, self.max_concurrent_batches)
    }

    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            ttl: Duration::from_secs(self.checkpoint_ttl_secs),
            flush_threshold: self.flush_threshold,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What an export actually wrote, used to update the caches afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    exported: HashSet<SourceId>,
    fingerprints: HashMap<SourceId, HashMap<ItemId, String>>,
}

impl ExportReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `source_id` as successfully exported.
    pub fn source_exported(mut self, source_id: &SourceId) -> Self {
        self.exported.insert(source_id.clone());
        self
    }

    /// Mark `source_id` as exported along with the fingerprints of the items
    /// examined for it.
    pub fn with_fingerprints(mut self, source_id: &SourceId, fingerprints: HashMap<ItemId, String>) -> Self {
        self.exported.insert(source_id.clone());
        self.fingerprints
            .entry(source_id.clone())
            .or_default()
            .extend(fingerprints);
        self
    }

    pub fn is_exported(&self, source_id: &SourceId) -> bool {
        self.exported.contains(source_id)
    }

    pub fn is_empty(&self) -> bool {
        self.exported.is_empty()
    }
}

/// Main engine for incremental, resumable exports.
pub struct SyncEngine {
    /// Remote design source.
    client: Arc<dyn RemoteClient>,
    /// Version cache, including node fingerprints.
    cache: Arc<RwLock<VersionCacheStore>>,
    /// Node document resolution.
    prefetch: PrefetchCoordinator,
    /// Configuration.
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new engine, loading the version cache unless caching is off.
    pub async fn new(client: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
        let cache = if config.cache_mode.is_enabled() {
            VersionCacheStore::load(&config.cache_path).await
        } else {
            VersionCacheStore::new()
        };
        let prefetch = PrefetchCoordinator::new(client.clone(), config.fetch_policy());

        Self {
            client,
            cache: Arc::new(RwLock::new(cache)),
            prefetch,
            config,
        }
    }

    /// Serve node documents from a snapshot populated for this batch run.
    pub fn with_snapshot(mut self, snapshot: Arc<PrefetchSnapshot>) -> Self {
        self.prefetch = self.prefetch.with_snapshot(snapshot);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get a reference to the version cache.
    pub fn cache(&self) -> Arc<RwLock<VersionCacheStore>> {
        self.cache.clone()
    }

    pub fn prefetch(&self) -> &PrefetchCoordinator {
        &self.prefetch
    }

    /// Check every source's remote version and decide how much to export.
    ///
    /// Lookups run concurrently and all must succeed; a failed lookup is
    /// returned as an error rather than guessed at.
    pub async fn decide(&self, sources: &[SourceId]) -> Result<SyncDecision> {
        if !self.config.cache_mode.is_enabled() {
            info!("Version cache disabled, running full export");
            return Ok(SyncDecision::Disabled);
        }

        let mut seen = HashSet::new();
        let unique: Vec<&SourceId> = sources.iter().filter(|s| seen.insert(*s)).collect();
        debug!("Checking versions of {} sources", unique.len());

        let versions = try_join_all(
            unique
                .into_iter()
                .map(|source_id| self.client.fetch_version(source_id)),
        )
        .await?;

        let decision = {
            let cache = self.cache.read().await;
            SyncDecision::classify(&cache, versions)
        };
        info!("Sync decision: {}", decision.summary());
        Ok(decision)
    }

    /// Narrow `candidates` of one source down to the items that changed.
    ///
    /// Outside granular mode every candidate is returned as changed, with no
    /// fingerprints and no network activity.
    pub async fn detect_changes<T>(
        &self,
        source_id: &SourceId,
        candidates: HashMap<ItemId, T>,
    ) -> Result<ChangeSet<T>> {
        if !self.config.cache_mode.is_granular() {
            return Ok(ChangeSet {
                changed: candidates,
                fingerprints: HashMap::new(),
            });
        }

        let index = self.cache.read().await.node_hashes().for_source(source_id);
        ChangeDetector::new(&self.prefetch, &index)
            .detect(source_id, candidates)
            .await
    }

    /// Resume or start the checkpoint for an export of `category`.
    ///
    /// Returns `None` if checkpointing is unavailable; the export then runs
    /// without resume support.
    pub async fn tracker(
        &self,
        config_path: &Path,
        category: ItemCategory,
        pending: CategoryItems,
    ) -> Option<CheckpointTracker> {
        match CheckpointTracker::resume_or_start(
            config_path,
            &self.config.checkpoint_dir,
            category,
            pending,
            self.config.tracker_options(),
        )
        .await
        {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                warn!("Checkpointing unavailable, exporting without resume: {}", e);
                None
            }
        }
    }

    /// Record a successful export in the caches and persist them.
    ///
    /// Only sources in `report` that `decision` marked as changed get a new
    /// version record; fingerprints are merged only in granular mode. Call
    /// this only after the export succeeded, so a failed run retries from the
    /// same baseline. Returns the number of version records written.
    pub async fn commit(&self, decision: &SyncDecision, report: &ExportReport) -> usize {
        if !self.config.cache_mode.is_enabled() || matches!(decision, SyncDecision::Disabled) {
            return 0;
        }

        let mut cache = self.cache.write().await;
        let mut updated = 0;
        for info in decision.changed() {
            if report.is_exported(&info.source_id) {
                cache.update(&info.source_id, info.version.clone(), info.name.clone());
                updated += 1;
            }
        }

        let mut fingerprints_written = 0;
        if self.config.cache_mode.is_granular() {
            for (source_id, fingerprints) in &report.fingerprints {
                if decision.allows(source_id) {
                    fingerprints_written += cache.node_hashes_mut().merge(source_id, fingerprints);
                }
            }
        }

        if updated == 0 && fingerprints_written == 0 {
            return 0;
        }

        match cache.save(&self.config.cache_path).await {
            Ok(()) => info!(
                "Cache updated: {} sources, {} node fingerprints",
                updated, fingerprints_written
            ),
            Err(e) => warn!("Failed to save version cache: {}", e),
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exfig_remote::{Color, MemoryRemote, Paint, RemoteDocument, VersionInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn source(id: &str) -> SourceId {
        SourceId::new(id).unwrap()
    }

    async fn engine(temp: &TempDir, remote: &MemoryRemote, mode: CacheMode) -> SyncEngine {
        let config = SyncConfig::default()
            .with_cache_mode(mode)
            .with_cache_path(temp.path().join(DEFAULT_CACHE_FILE))
            .with_checkpoint_dir(temp.path());
        SyncEngine::new(Arc::new(remote.clone()), config).await
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.flush_threshold, 5);
        assert_eq!(config.cache_path, PathBuf::from(".exfig-cache.json"));
        assert_eq!(config.tracker_options().ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_config_round_trip() {
        let config = SyncConfig::default()
            .with_cache_mode(CacheMode::Granular)
            .with_fetch_policy(FetchPolicy::new(50, 2));
        let restored = SyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
        assert_eq!(restored.fetch_policy(), FetchPolicy::new(50, 2));
    }

    #[tokio::test]
    async fn test_disabled_mode_skips_lookups() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        let engine = engine(&temp, &remote, CacheMode::Disabled).await;

        let decision = engine.decide(&[source("a")]).await.unwrap();
        assert_eq!(decision, SyncDecision::Disabled);
        assert_eq!(remote.version_request_count(), 0);

        let report = ExportReport::new().source_exported(&source("a"));
        assert_eq!(engine.commit(&decision, &report).await, 0);
        assert!(!temp.path().join(DEFAULT_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_decide_then_commit_then_skip() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.insert_source(&source("a"), "1", Some("Colors"));
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let decision = engine.decide(&[source("a")]).await.unwrap();
        assert!(matches!(decision, SyncDecision::FullChanges { .. }));

        let report = ExportReport::new().source_exported(&source("a"));
        assert_eq!(engine.commit(&decision, &report).await, 1);

        // A fresh engine sees the persisted cache.
        let engine = self::engine(&temp, &remote, CacheMode::FileLevel).await;
        let decision = engine.decide(&[source("a")]).await.unwrap();
        assert!(!decision.should_export());

        let cache = engine.cache();
        let cache = cache.read().await;
        assert_eq!(cache.record(&source("a")).unwrap().display_name.as_deref(), Some("Colors"));
    }

    #[tokio::test]
    async fn test_lookups_are_deduplicated() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.insert_source(&source("a"), "1", None);
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        engine.decide(&[source("a"), source("a")]).await.unwrap();
        assert_eq!(remote.version_request_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_aborts_decision() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.insert_source(&source("a"), "1", None);
        remote.insert_source(&source("b"), "1", None);
        remote.fail_source(&source("b"));
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let err = engine.decide(&[source("a"), source("b")]).await.unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_commit_only_records_exported_sources() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.insert_source(&source("a"), "1", None);
        remote.insert_source(&source("b"), "1", None);
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let decision = engine.decide(&[source("a"), source("b")]).await.unwrap();
        let report = ExportReport::new().source_exported(&source("a"));
        assert_eq!(engine.commit(&decision, &report).await, 1);

        let cache = engine.cache();
        let cache = cache.read().await;
        assert!(!cache.needs_export(&source("a"), "1"));
        assert!(cache.needs_export(&source("b"), "1"));
    }

    #[tokio::test]
    async fn test_empty_report_leaves_cache_untouched() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        remote.insert_source(&source("a"), "1", None);
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let decision = engine.decide(&[source("a")]).await.unwrap();
        assert_eq!(engine.commit(&decision, &ExportReport::new()).await, 0);
        assert!(!temp.path().join(DEFAULT_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_granular_detection_round_trip() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        let file = source("icons");
        remote.insert_source(&file, "1", None);
        for (id, red) in [("n1", 0.1), ("n2", 0.2)] {
            remote.insert_node(
                &file,
                RemoteDocument::new(id, id, "COMPONENT").with_fill(Paint::solid(Color::rgba(red, 0.0, 0.0, 1.0))),
            );
        }
        let engine = engine(&temp, &remote, CacheMode::Granular).await;

        let candidates: HashMap<ItemId, ()> =
            [(ItemId::from("n1"), ()), (ItemId::from("n2"), ())].into_iter().collect();

        let decision = engine.decide(&[file.clone()]).await.unwrap();
        let first = engine.detect_changes(&file, candidates.clone()).await.unwrap();
        assert_eq!(first.changed.len(), 2);

        let report = ExportReport::new().with_fingerprints(&file, first.fingerprints);
        engine.commit(&decision, &report).await;

        remote.insert_node(
            &file,
            RemoteDocument::new("n2", "n2", "COMPONENT").with_fill(Paint::solid(Color::rgba(0.9, 0.0, 0.0, 1.0))),
        );
        let second = engine.detect_changes(&file, candidates).await.unwrap();
        assert_eq!(second.changed.len(), 1);
        assert!(second.changed.contains_key("n2"));
    }

    #[tokio::test]
    async fn test_file_level_mode_skips_detection() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let candidates: HashMap<ItemId, u8> = [(ItemId::from("n1"), 1)].into_iter().collect();
        let result = engine.detect_changes(&source("f"), candidates).await.unwrap();

        assert_eq!(result.changed.len(), 1);
        assert!(result.fingerprints.is_empty());
        assert_eq!(remote.node_request_count(), 0);
    }

    #[tokio::test]
    async fn test_tracker_unavailable_without_config_file() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRemote::new();
        let engine = engine(&temp, &remote, CacheMode::FileLevel).await;

        let tracker = engine
            .tracker(
                &temp.path().join("missing.pkl"),
                ItemCategory::Icons,
                CategoryItems::new().with_icons(["a"]),
            )
            .await;
        assert!(tracker.is_none());
    }

    /// Client whose version lookups take a while and record overlap.
    #[derive(Default)]
    struct SlowVersions {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteClient for SlowVersions {
        fn name(&self) -> &str {
            "slow-versions"
        }

        async fn fetch_nodes(
            &self,
            _source_id: &SourceId,
            _item_ids: &[ItemId],
        ) -> Result<HashMap<ItemId, RemoteDocument>> {
            Ok(HashMap::new())
        }

        async fn fetch_version(&self, source_id: &SourceId) -> Result<VersionInfo> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(VersionInfo {
                source_id: source_id.clone(),
                version: "1".to_string(),
                name: None,
                last_modified: None,
            })
        }
    }

    #[tokio::test]
    async fn test_version_lookups_overlap() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(SlowVersions::default());
        let config = SyncConfig::default().with_cache_path(temp.path().join(DEFAULT_CACHE_FILE));
        let engine = SyncEngine::new(client.clone(), config).await;

        let sources: Vec<SourceId> = ["light", "dark", "contrast", "brand"]
            .into_iter()
            .map(source)
            .collect();
        let decision = engine.decide(&sources).await.unwrap();

        assert_eq!(decision.changed().len(), 4);
        assert!(client.peak.load(Ordering::SeqCst) > 1);
    }
}
