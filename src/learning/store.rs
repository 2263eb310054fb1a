//! Durable selector map.
//!
//! Layout on disk (`<learning_dir>/selector_map.json`):
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "player.example.com/room|now playing": {
//!       "stop": ["#transport-stop", "role=button[name=\"Stop\"]"]
//!     }
//!   },
//!   "updated_at": "2026-03-01T10:00:00Z"
//! }
//! ```
//!
//! The file is read fully and rewritten fully on every mutation, under an
//! exclusive lock, through a temp file and rename. Lists are most recent
//! first, deduplicated, and capped at [`MAX_SELECTORS_PER_TARGET`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::keys::target_key;

/// Current schema version of the selector map.
pub const SELECTOR_MAP_VERSION: u32 = 1;

/// File name of the selector map inside the learning directory.
pub const SELECTOR_MAP_FILENAME: &str = "selector_map.json";

/// Selectors kept per target; the oldest is evicted beyond this.
pub const MAX_SELECTORS_PER_TARGET: usize = 6;

/// In-memory form of the selector map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMap {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    updated_at: DateTime<Utc>,
}

impl Default for SelectorMap {
    fn default() -> Self {
        Self {
            version: SELECTOR_MAP_VERSION,
            entries: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl SelectorMap {
    /// Selectors for `(state_key, target_key)`, most recent first.
    #[must_use]
    pub fn get(&self, state_key: &str, target_key: &str) -> &[String] {
        self.entries
            .get(state_key)
            .and_then(|targets| targets.get(target_key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Put `selector` at the front of the list, dropping an equal entry and
    /// evicting the oldest past the cap. Returns whether the list changed.
    pub fn insert(&mut self, state_key: &str, target_key: &str, selector: &str) -> bool {
        let list = self
            .entries
            .entry(state_key.to_string())
            .or_default()
            .entry(target_key.to_string())
            .or_default();

        if list.first().map(String::as_str) == Some(selector) {
            return false;
        }
        list.retain(|existing| existing != selector);
        list.insert(0, selector.to_string());
        list.truncate(MAX_SELECTORS_PER_TARGET);
        self.updated_at = Utc::now();
        true
    }

    /// All page-context keys.
    pub fn state_keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// All targets learned for a page context.
    #[must_use]
    pub fn targets(&self, state_key: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.entries.get(state_key)
    }

    /// Number of (state, target) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_compatible_version(&self) -> bool {
        self.version == SELECTOR_MAP_VERSION
    }
}

/// Handle on the selector map stored in a learning directory.
#[derive(Debug, Clone)]
pub struct LearningStore {
    dir: PathBuf,
}

impl LearningStore {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn map_path(&self) -> PathBuf {
        self.dir.join(SELECTOR_MAP_FILENAME)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{SELECTOR_MAP_FILENAME}.lock"))
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{SELECTOR_MAP_FILENAME}.tmp"))
    }

    /// Read the whole map. Missing, corrupted, or incompatible files read
    /// as an empty map.
    pub fn load(&self) -> anyhow::Result<SelectorMap> {
        let path = self.map_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SelectorMap::default())
            }
            Err(e) => return Err(e.into()),
        };

        let map: SelectorMap = match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Selector map at {} is corrupted, treating as empty: {}",
                    path.display(),
                    e
                );
                return Ok(SelectorMap::default());
            }
        };

        if !map.is_compatible_version() {
            warn!(
                "Selector map version {} is not supported (expected {}), treating as empty",
                map.version, SELECTOR_MAP_VERSION
            );
            return Ok(SelectorMap::default());
        }
        Ok(map)
    }

    /// Learned selectors for a target label on a page, most recent first.
    ///
    /// Lookup never fails the caller: read errors are logged and yield no
    /// candidates.
    #[must_use]
    pub fn lookup(&self, state_key: &str, target_label: &str) -> Vec<String> {
        let Some(key) = target_key(target_label) else {
            return Vec::new();
        };
        match self.load() {
            Ok(map) => map.get(state_key, &key).to_vec(),
            Err(e) => {
                warn!("Failed to read selector map: {}", e);
                Vec::new()
            }
        }
    }

    /// Record that `selector` worked for `target_label` on `state_key`.
    ///
    /// Returns `Ok(false)` when nothing changed: the selector was already
    /// the most recent one, it was empty, or the label has no valid key.
    pub fn remember(
        &self,
        state_key: &str,
        target_label: &str,
        selector: &str,
    ) -> anyhow::Result<bool> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Ok(false);
        }
        let Some(key) = target_key(target_label) else {
            debug!("Not learning selector for rejected target label {:?}", target_label);
            return Ok(false);
        };

        fs::create_dir_all(&self.dir)?;
        let lock_file = File::create(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let mut map = self.load()?;
        let changed = map.insert(state_key, &key, selector);
        if changed {
            self.write(&map)?;
            debug!("Learned selector {} for {} on {}", selector, key, state_key);
        }

        FileExt::unlock(&lock_file)?;
        Ok(changed)
    }

    fn write(&self, map: &SelectorMap) -> anyhow::Result<()> {
        let tmp_path = self.tmp_path();
        let json = serde_json::to_string_pretty(map)?;
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.map_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAGE: &str = "player.example.com/room|now playing";

    #[test]
    fn test_remember_then_lookup_returns_selector_first() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());

        assert!(store.remember(PAGE, "Stop", "#old-stop").unwrap());
        assert!(store.remember(PAGE, "Stop", "#transport-stop").unwrap());

        let found = store.lookup(PAGE, "stop");
        assert_eq!(found, vec!["#transport-stop", "#old-stop"]);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());

        for i in 0..7 {
            store.remember(PAGE, "Stop", &format!("#stop-{i}")).unwrap();
        }
        let found = store.lookup(PAGE, "Stop");
        assert_eq!(found.len(), MAX_SELECTORS_PER_TARGET);
        assert_eq!(found[0], "#stop-6");
        assert!(!found.contains(&"#stop-0".to_string()));
    }

    #[test]
    fn test_repeated_write_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());

        assert!(store.remember(PAGE, "Stop", "#a").unwrap());
        assert!(!store.remember(PAGE, "Stop", "#a").unwrap());
        assert_eq!(store.lookup(PAGE, "Stop"), vec!["#a"]);
    }

    #[test]
    fn test_reinserting_moves_to_front_without_duplicate() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());

        store.remember(PAGE, "Stop", "#a").unwrap();
        store.remember(PAGE, "Stop", "#b").unwrap();
        store.remember(PAGE, "Stop", "#a").unwrap();
        assert_eq!(store.lookup(PAGE, "Stop"), vec!["#a", "#b"]);
    }

    #[test]
    fn test_signature_labels_are_not_learned() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());

        assert!(!store.remember(PAGE, "0:click_text:Stop", "#a").unwrap());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        LearningStore::new(temp.path())
            .remember(PAGE, "Play", "#transport-play")
            .unwrap();

        let reopened = LearningStore::new(temp.path());
        assert_eq!(reopened.lookup(PAGE, "Play"), vec!["#transport-play"]);
        assert!(reopened.lookup("other.example.com|x", "Play").is_empty());
    }

    #[test]
    fn test_corrupted_file_reads_empty_and_is_replaced() {
        let temp = TempDir::new().unwrap();
        let store = LearningStore::new(temp.path());
        std::fs::write(store.map_path(), "{ not json").unwrap();

        assert!(store.lookup(PAGE, "Stop").is_empty());
        assert!(store.remember(PAGE, "Stop", "#a").unwrap());
        assert_eq!(store.lookup(PAGE, "Stop"), vec!["#a"]);
    }

    #[test]
    fn test_map_counts_pairs() {
        let mut map = SelectorMap::default();
        map.insert("a|x", "stop", "#s");
        map.insert("a|x", "play", "#p");
        map.insert("b|y", "stop", "#s");
        assert_eq!(map.len(), 3);
        assert_eq!(map.state_keys().count(), 2);
        assert_eq!(map.targets("a|x").unwrap().len(), 2);
    }
}
