//! Persisted mapping from originals to their thumbnails.
//!
//! Picture targets carry their thumbnail location in memory only. The CLI
//! needs that association to survive between runs, otherwise every run would
//! mint fresh thumbnails instead of running the staleness check against the
//! existing ones. This module stores it as `index.json` inside the thumbnail
//! directory.
//!
//! ## Storage
//!
//! ```text
//! {
//!   "version": 1,
//!   "entries": {
//!     "/photos/a.jpg": { "thumbnail": "/tmp/…/Thumbnail_1f0c….jpg", "rotation": 0.0 }
//!   }
//! }
//! ```
//!
//! A missing, corrupt, or version-mismatched file loads as an empty index,
//! which costs at most one regeneration per picture.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the index file within the thumbnail directory.
const INDEX_FILENAME: &str = "index.json";

/// Version of the index format. Bump this to discard all existing indexes
/// when the format changes.
const INDEX_VERSION: u32 = 1;

/// A single original's thumbnail record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct IndexEntry {
    pub thumbnail: String,
    /// Rotation the thumbnail was rendered with.
    pub rotation: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThumbnailIndex {
    pub version: u32,
    pub entries: HashMap<String, IndexEntry>,
}

impl ThumbnailIndex {
    pub fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: HashMap::new(),
        }
    }

    /// Load from the thumbnail directory. Returns an empty index if the
    /// file doesn't exist or can't be parsed.
    pub fn load(directory: &Path) -> Self {
        let path = index_path(directory);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let index: Self = match serde_json::from_str(&content) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring corrupt thumbnail index"
                );
                return Self::empty();
            }
        };
        if index.version != INDEX_VERSION {
            return Self::empty();
        }
        index
    }

    /// Save to the thumbnail directory, creating it if needed.
    pub fn save(&self, directory: &Path) -> io::Result<()> {
        std::fs::create_dir_all(directory)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(index_path(directory), json)
    }

    /// Thumbnail recorded for `original`, if it was rendered with `rotation`.
    ///
    /// A rotation change makes the old thumbnail useless, so it is not returned.
    pub fn thumbnail_for(&self, original: &str, rotation: f64) -> Option<&str> {
        self.entries
            .get(original)
            .filter(|e| e.rotation == rotation)
            .map(|e| e.thumbnail.as_str())
    }

    pub fn insert(&mut self, original: String, thumbnail: String, rotation: f64) {
        self.entries
            .insert(original, IndexEntry { thumbnail, rotation });
    }

    pub fn remove(&mut self, original: &str) -> Option<IndexEntry> {
        self.entries.remove(original)
    }

    /// Drop entries whose local thumbnail file no longer exists.
    ///
    /// Returns the number of entries removed.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| match crate::naming::local_path(&e.thumbnail) {
            Some(path) => path.exists(),
            None => true,
        });
        before - self.entries.len()
    }
}

/// Resolve the index path for a thumbnail directory.
pub fn index_path(directory: &Path) -> PathBuf {
    directory.join(INDEX_FILENAME)
}
