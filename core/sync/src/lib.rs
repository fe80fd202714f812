//! ExFig Sync Engine
//!
//! This module provides incremental and resumable exports, including:
//! - File-level version caching to skip unchanged sources
//! - Per-item content fingerprints for granular change detection
//! - Batched, bounded-concurrency prefetching of node documents
//! - Export checkpoints so interrupted runs resume where they stopped

pub mod cache;
pub mod checkpoint;
pub mod decision;
pub mod detector;
pub mod engine;
pub mod hasher;
pub mod node_index;
pub mod persist;
pub mod prefetch;
pub mod tracker;

// Re-export main types
pub use cache::{FileVersionRecord, VersionCacheStore, CACHE_SCHEMA_VERSION, DEFAULT_CACHE_FILE};
pub use checkpoint::{
    config_fingerprint, CategoryItems, ExportCheckpoint, ItemCategory, CHECKPOINT_FILE_NAME,
};
pub use decision::{CacheMode, SyncDecision};
pub use detector::{ChangeDetector, ChangeSet};
pub use engine::{ExportReport, SyncConfig, SyncEngine};
pub use hasher::{ContentHasher, HashableProperties, SENTINEL_FINGERPRINT};
pub use node_index::NodeHashIndex;
pub use prefetch::{FetchPolicy, PrefetchCoordinator, PrefetchSnapshot};
pub use tracker::{CheckpointOutcome, CheckpointProgress, CheckpointTracker, TrackerOptions};
