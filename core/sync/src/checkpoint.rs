//! Persisted export checkpoint for resumable exports.

use blake2::{Blake2s256, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use uuid::Uuid;

use exfig_common::Result;

use crate::persist;

/// Checkpoint file name inside the checkpoint directory.
pub const CHECKPOINT_FILE_NAME: &str = ".exfig-checkpoint.json";

/// Age after which a checkpoint is no longer resumed.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Kind of asset an export produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Colors,
    Typography,
    Icons,
    Images,
}

impl ItemCategory {
    /// Whether the category tracks individual names or a single flag.
    pub fn is_named(&self) -> bool {
        matches!(self, ItemCategory::Icons | ItemCategory::Images)
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemCategory::Colors => "colors",
            ItemCategory::Typography => "typography",
            ItemCategory::Icons => "icons",
            ItemCategory::Images => "images",
        };
        f.write_str(name)
    }
}

/// One side (completed or pending) of a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryItems {
    #[serde(default)]
    pub colors: bool,
    #[serde(default)]
    pub typography: bool,
    #[serde(default)]
    pub icons: BTreeSet<String>,
    #[serde(default)]
    pub images: BTreeSet<String>,
}

impl CategoryItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_colors(mut self) -> Self {
        self.colors = true;
        self
    }

    pub fn with_typography(mut self) -> Self {
        self.typography = true;
        self
    }

    pub fn with_icons<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.icons.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_images<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images.extend(names.into_iter().map(Into::into));
        self
    }

    /// Number of flags set plus named items held.
    pub fn count(&self) -> usize {
        usize::from(self.colors) + usize::from(self.typography) + self.icons.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Count restricted to one category.
    pub fn count_in(&self, category: ItemCategory) -> usize {
        match category {
            ItemCategory::Colors => usize::from(self.colors),
            ItemCategory::Typography => usize::from(self.typography),
            ItemCategory::Icons => self.icons.len(),
            ItemCategory::Images => self.images.len(),
        }
    }

    fn names(&self, category: ItemCategory) -> Option<&BTreeSet<String>> {
        match category {
            ItemCategory::Icons => Some(&self.icons),
            ItemCategory::Images => Some(&self.images),
            _ => None,
        }
    }

    fn names_mut(&mut self, category: ItemCategory) -> Option<&mut BTreeSet<String>> {
        match category {
            ItemCategory::Icons => Some(&mut self.icons),
            ItemCategory::Images => Some(&mut self.images),
            _ => None,
        }
    }
}

/// Progress of one export session.
///
/// Every item is in exactly one of `completed` and `pending`; marking an item
/// moves it across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCheckpoint {
    #[serde(rename = "exportID")]
    pub export_id: String,
    pub started_at: DateTime<Utc>,
    /// Fingerprint of the configuration file the session was started with.
    #[serde(rename = "configHash")]
    pub config_hash: String,
    pub config_path: String,
    pub completed: CategoryItems,
    pub pending: CategoryItems,
}

impl ExportCheckpoint {
    /// Start a new session with everything in `pending`.
    pub fn new(config_hash: impl Into<String>, config_path: impl Into<String>, pending: CategoryItems) -> Self {
        Self {
            export_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config_hash: config_hash.into(),
            config_path: config_path.into(),
            completed: CategoryItems::new(),
            pending,
        }
    }

    /// Path of the checkpoint file inside `directory`.
    pub fn path_in(directory: &Path) -> PathBuf {
        directory.join(CHECKPOINT_FILE_NAME)
    }

    /// Move an icon to completed. Returns whether it was pending.
    pub fn mark_icon_completed(&mut self, name: &str) -> bool {
        self.mark_named(ItemCategory::Icons, name)
    }

    /// Move an image to completed. Returns whether it was pending.
    pub fn mark_image_completed(&mut self, name: &str) -> bool {
        self.mark_named(ItemCategory::Images, name)
    }

    pub fn mark_colors_completed(&mut self) -> bool {
        let was_pending = self.pending.colors;
        self.pending.colors = false;
        self.completed.colors = true;
        was_pending
    }

    pub fn mark_typography_completed(&mut self) -> bool {
        let was_pending = self.pending.typography;
        self.pending.typography = false;
        self.completed.typography = true;
        was_pending
    }

    /// Mark completion within `category`; `name` is ignored for flag categories.
    pub fn mark_completed(&mut self, category: ItemCategory, name: &str) -> bool {
        match category {
            ItemCategory::Colors => self.mark_colors_completed(),
            ItemCategory::Typography => self.mark_typography_completed(),
            ItemCategory::Icons | ItemCategory::Images => self.mark_named(category, name),
        }
    }

    fn mark_named(&mut self, category: ItemCategory, name: &str) -> bool {
        let was_pending = self
            .pending
            .names_mut(category)
            .map(|names| names.remove(name))
            .unwrap_or(false);
        if let Some(names) = self.completed.names_mut(category) {
            names.insert(name.to_string());
        }
        was_pending
    }

    /// Whether `name` (or the flag, for colors/typography) is completed.
    pub fn is_completed(&self, category: ItemCategory, name: &str) -> bool {
        match category {
            ItemCategory::Colors => self.completed.colors,
            ItemCategory::Typography => self.completed.typography,
            _ => self
                .completed
                .names(category)
                .is_some_and(|names| names.contains(name)),
        }
    }

    /// Whether this session holds any item of `category`, pending or done.
    pub fn tracks(&self, category: ItemCategory) -> bool {
        self.pending.count_in(category) + self.completed.count_in(category) > 0
    }

    /// Fold in completions another writer recorded for the same session.
    ///
    /// Checkpoints from a different session are ignored. Returns the number
    /// of items that moved from pending to completed.
    pub fn absorb_completed(&mut self, other: &ExportCheckpoint) -> usize {
        if other.export_id != self.export_id {
            return 0;
        }

        let mut moved = 0;
        if other.completed.colors && self.mark_colors_completed() {
            moved += 1;
        }
        if other.completed.typography && self.mark_typography_completed() {
            moved += 1;
        }
        for name in &other.completed.icons {
            moved += usize::from(self.mark_icon_completed(name));
        }
        for name in &other.completed.images {
            moved += usize::from(self.mark_image_completed(name));
        }
        moved
    }

    /// Nothing is left pending.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(Utc::now(), ttl)
    }

    /// Expiry relative to `now`. A start time in the future never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(self.started_at).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }

    pub fn matches_config(&self, fingerprint: &str) -> bool {
        self.config_hash == fingerprint
    }

    /// Load the checkpoint at `path`, or `None` if there is none.
    ///
    /// # Errors
    /// - I/O errors other than absence
    /// - Undecodable file
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        persist::read_json(path).await
    }

    /// Persist atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self).await
    }

    /// Remove the checkpoint file at `path`. Returns whether one existed.
    pub async fn delete(path: &Path) -> Result<bool> {
        persist::remove_if_exists(path).await
    }
}

/// Stable fingerprint of a configuration file's bytes.
pub async fn config_fingerprint(config_path: &Path) -> Result<String> {
    let bytes = fs::read(config_path).await?;
    let digest = Blake2s256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn icons_checkpoint() -> ExportCheckpoint {
        ExportCheckpoint::new(
            "hash",
            "exfig.pkl",
            CategoryItems::new().with_icons(["a", "b", "c"]),
        )
    }

    #[test]
    fn test_mark_moves_between_sets() {
        let mut checkpoint = icons_checkpoint();

        assert!(checkpoint.mark_icon_completed("a"));
        assert!(!checkpoint.mark_icon_completed("a"));

        assert!(checkpoint.completed.icons.contains("a"));
        assert!(!checkpoint.pending.icons.contains("a"));
        assert!(checkpoint.completed.icons.is_disjoint(&checkpoint.pending.icons));
        assert!(!checkpoint.is_complete());
    }

    #[test]
    fn test_complete_when_nothing_pending() {
        let mut checkpoint = ExportCheckpoint::new(
            "hash",
            "exfig.pkl",
            CategoryItems::new().with_colors().with_typography().with_images(["hero"]),
        );

        checkpoint.mark_colors_completed();
        checkpoint.mark_typography_completed();
        assert!(!checkpoint.is_complete());
        checkpoint.mark_image_completed("hero");
        assert!(checkpoint.is_complete());
        assert!(checkpoint.is_completed(ItemCategory::Colors, ""));
        assert!(checkpoint.is_completed(ItemCategory::Images, "hero"));
    }

    #[tokio::test]
    async fn test_round_trip_partial_progress() {
        let temp = TempDir::new().unwrap();
        let path = ExportCheckpoint::path_in(temp.path());

        let mut checkpoint = icons_checkpoint();
        checkpoint.mark_icon_completed("a");
        checkpoint.mark_icon_completed("b");
        checkpoint.save(&path).await.unwrap();

        let loaded = ExportCheckpoint::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.completed.icons, BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(loaded.pending.icons, BTreeSet::from(["c".to_string()]));
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_wire_format() {
        let checkpoint = icons_checkpoint();
        let value = serde_json::to_value(&checkpoint).unwrap();

        assert!(value["exportID"].is_string());
        assert!(value["startedAt"].is_string());
        assert_eq!(value["configHash"], "hash");
        assert_eq!(value["configPath"], "exfig.pkl");
        assert_eq!(value["pending"]["icons"], serde_json::json!(["a", "b", "c"]));
        assert_eq!(value["completed"]["colors"], false);
    }

    #[test]
    fn test_expiration() {
        let mut checkpoint = icons_checkpoint();
        let now = Utc::now();

        checkpoint.started_at = now - ChronoDuration::hours(25);
        assert!(checkpoint.is_expired_at(now, DEFAULT_CHECKPOINT_TTL));

        checkpoint.started_at = now - ChronoDuration::hours(1);
        assert!(!checkpoint.is_expired_at(now, DEFAULT_CHECKPOINT_TTL));

        checkpoint.started_at = now + ChronoDuration::hours(1);
        assert!(!checkpoint.is_expired_at(now, DEFAULT_CHECKPOINT_TTL));
    }

    #[test]
    fn test_matches_config() {
        let checkpoint = icons_checkpoint();
        assert!(checkpoint.matches_config("hash"));
        assert!(!checkpoint.matches_config("other"));
    }

    #[tokio::test]
    async fn test_config_fingerprint_tracks_content() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("exfig.pkl");

        std::fs::write(&config, "figma { lightFileId = \"abc\" }").unwrap();
        let first = config_fingerprint(&config).await.unwrap();
        assert_eq!(first, config_fingerprint(&config).await.unwrap());
        assert_eq!(first.len(), 64);

        std::fs::write(&config, "figma { lightFileId = \"\" }").unwrap();
        assert_ne!(first, config_fingerprint(&config).await.unwrap());
    }

    #[test]
    fn test_tracks_only_its_categories() {
        let checkpoint = ExportCheckpoint::new("h", "exfig.pkl", CategoryItems::new().with_icons(["a"]));
        assert!(checkpoint.tracks(ItemCategory::Icons));
        assert!(!checkpoint.tracks(ItemCategory::Images));
        assert!(!checkpoint.tracks(ItemCategory::Colors));
    }

    #[test]
    fn test_absorb_completed_from_same_session() {
        let pending = CategoryItems::new().with_colors().with_icons(["a", "b"]).with_images(["h"]);
        let mut ours = ExportCheckpoint::new("h", "exfig.pkl", pending);
        let mut theirs = ours.clone();
        theirs.mark_icon_completed("a");
        theirs.mark_colors_completed();
        ours.mark_image_completed("h");

        assert_eq!(ours.absorb_completed(&theirs), 2);
        assert!(ours.is_completed(ItemCategory::Icons, "a"));
        assert!(ours.is_completed(ItemCategory::Images, "h"));
        assert!(ours.completed.colors);
        assert_eq!(ours.pending.icons.iter().collect::<Vec<_>>(), vec!["b"]);

        let mut done = ExportCheckpoint::new("h", "exfig.pkl", CategoryItems::new().with_icons(["b"]));
        done.mark_icon_completed("b");
        let mut unrelated = ExportCheckpoint::new("h", "exfig.pkl", CategoryItems::new().with_icons(["b"]));
        assert_eq!(unrelated.absorb_completed(&done), 0);
        assert!(unrelated.pending.icons.contains("b"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let path = ExportCheckpoint::path_in(temp.path());
        assert!(!ExportCheckpoint::delete(&path).await.unwrap());
    }
}
