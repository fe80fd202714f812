//! Skip / partial / full export decisions.

use serde::{Deserialize, Serialize};

use exfig_common::SourceId;
use exfig_remote::VersionInfo;

use crate::cache::VersionCacheStore;

/// How much caching a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheMode {
    /// No cache reads or writes; every run exports everything.
    Disabled,
    /// Skip sources whose version is unchanged.
    #[default]
    FileLevel,
    /// File-level skipping plus per-item fingerprint filtering.
    Granular,
}

impl CacheMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CacheMode::Disabled)
    }

    pub fn is_granular(&self) -> bool {
        matches!(self, CacheMode::Granular)
    }
}

/// Result of checking every relevant source against the version cache.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    /// Caching is off: export everything and touch no cache.
    Disabled,
    /// Nothing changed; skip the export.
    NoChanges { unchanged: Vec<VersionInfo> },
    /// Every checked source changed; export without restriction.
    FullChanges { changed: Vec<VersionInfo> },
    /// Some sources changed; export only from those.
    PartialChanges {
        changed: Vec<VersionInfo>,
        unchanged: Vec<VersionInfo>,
    },
}

impl SyncDecision {
    /// Partition fetched versions against the cache.
    ///
    /// Checking zero sources yields `NoChanges`.
    pub fn classify(cache: &VersionCacheStore, versions: Vec<VersionInfo>) -> Self {
        let (changed, unchanged): (Vec<_>, Vec<_>) = versions
            .into_iter()
            .partition(|info| cache.needs_export(&info.source_id, &info.version));

        match (changed.is_empty(), unchanged.is_empty()) {
            (true, _) => SyncDecision::NoChanges { unchanged },
            (false, true) => SyncDecision::FullChanges { changed },
            (false, false) => SyncDecision::PartialChanges { changed, unchanged },
        }
    }

    /// Whether any export work should run.
    pub fn should_export(&self) -> bool {
        !matches!(self, SyncDecision::NoChanges { .. })
    }

    /// Versions of the sources that need exporting (empty when disabled).
    pub fn changed(&self) -> &[VersionInfo] {
        match self {
            SyncDecision::FullChanges { changed } | SyncDecision::PartialChanges { changed, .. } => {
                changed.as_slice()
            }
            SyncDecision::Disabled | SyncDecision::NoChanges { .. } => &[],
        }
    }

    pub fn unchanged(&self) -> &[VersionInfo] {
        match self {
            SyncDecision::NoChanges { unchanged } | SyncDecision::PartialChanges { unchanged, .. } => {
                unchanged.as_slice()
            }
            SyncDecision::Disabled | SyncDecision::FullChanges { .. } => &[],
        }
    }

    /// Sources the export may draw from; `None` means unrestricted.
    pub fn sources_to_export(&self) -> Option<Vec<&SourceId>> {
        match self {
            SyncDecision::Disabled | SyncDecision::FullChanges { .. } => None,
            SyncDecision::NoChanges { .. } => Some(Vec::new()),
            SyncDecision::PartialChanges { changed, .. } => {
                Some(changed.iter().map(|info| &info.source_id).collect())
            }
        }
    }

    /// Whether `source_id` may contribute data to this export.
    pub fn allows(&self, source_id: &SourceId) -> bool {
        match self.sources_to_export() {
            None => true,
            Some(sources) => sources.contains(&source_id),
        }
    }

    /// One-line description for reporting.
    pub fn summary(&self) -> String {
        match self {
            SyncDecision::Disabled => "cache disabled, exporting everything".to_string(),
            SyncDecision::NoChanges { unchanged } => {
                format!("no changes in {} sources, skipping export", unchanged.len())
            }
            SyncDecision::FullChanges { changed } => {
                format!("all {} sources changed", changed.len())
            }
            SyncDecision::PartialChanges { changed, unchanged } => format!(
                "{} of {} sources changed",
                changed.len(),
                changed.len() + unchanged.len()
            ),
        }
    }
}
