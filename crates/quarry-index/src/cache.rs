//! Short-TTL memo of detector results.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::sync_map::SharedMap;
use crate::workspace::WorkspaceInfo;

#[derive(Debug, Clone)]
struct CacheEntry {
    info: WorkspaceInfo,
    inserted: Instant,
}

/// Detection results keyed by the caller's input path.
///
/// Entries expire after a fixed TTL; there is no size-based eviction.
#[derive(Debug)]
pub struct DetectionCache {
    entries: SharedMap<PathBuf, CacheEntry>,
    ttl: Duration,
}

impl DetectionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: SharedMap::default(),
            ttl,
        }
    }

    /// Returns the cached value, or `None` when absent or expired.
    #[must_use]
    pub fn get(&self, key: &Path) -> Option<WorkspaceInfo> {
        let entry = self.entries.get(&key.to_path_buf())?;
        (entry.inserted.elapsed() < self.ttl).then_some(entry.info)
    }

    pub fn set(&self, key: PathBuf, info: WorkspaceInfo) {
        self.entries.insert(
            key,
            CacheEntry {
                info,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries and return how many were removed.
    pub fn clean_expired(&self) -> usize {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted.elapsed() < ttl)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
