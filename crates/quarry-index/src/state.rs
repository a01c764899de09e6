//! Persisted per-file fingerprints used for change detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// `(modified time, size)` of one file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub modified_ns: u64,
    pub size: u64,
}

impl FileState {
    #[must_use]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let modified_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Self {
            modified_ns,
            size: meta.len(),
        }
    }
}

/// Stat every path, skipping files that disappeared since the scan.
#[must_use]
pub fn snapshot(paths: &[PathBuf]) -> BTreeMap<String, FileState> {
    paths
        .iter()
        .filter_map(|p| {
            let meta = std::fs::metadata(p).ok()?;
            Some((p.to_string_lossy().into_owned(), FileState::from_metadata(&meta)))
        })
        .collect()
}

/// What has already been indexed for one (workspace, language) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceState {
    /// Unix milliseconds of the last completed run.
    pub last_indexed: u64,
    pub files: BTreeMap<String, FileState>,
}

/// `<root>/<state_dir>/state-<lang>.json`
#[must_use]
pub fn state_path(root: &Path, state_dir: &str, lang: Lang) -> PathBuf {
    root.join(state_dir).join(format!("state-{}.json", lang.id()))
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl WorkspaceState {
    /// Load persisted state. Absent or malformed files yield an empty state.
    pub async fn load(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no persisted state, starting empty");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read state, starting empty: {e:#}");
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                let err = IndexError::StateCorrupt(e.to_string());
                tracing::warn!(path = %path.display(), "{err}, starting empty");
                Self::default()
            }
        }
    }

    /// Write state atomically through a sibling temp file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Record the outcome of a run: advance `indexed` entries, forget `removed` ones.
    pub fn apply<'a>(
        &mut self,
        indexed: impl IntoIterator<Item = (&'a String, &'a FileState)>,
        removed: &[String],
    ) {
        for path in removed {
            self.files.remove(path);
        }
        for (path, state) in indexed {
            self.files.insert(path.clone(), *state);
        }
        self.last_indexed = unix_now_ms();
    }
}

/// Authoritative per-file diff between persisted state and disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    /// Present on disk, not tracked yet.
    pub added: Vec<String>,
    /// Tracked, but the fingerprint changed. Old chunks must be purged first.
    pub modified: Vec<String>,
    /// Tracked, no longer on disk.
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl ChangePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Files whose existing chunks must be deleted before anything is added.
    pub fn to_purge(&self) -> impl Iterator<Item = &String> {
        self.modified.iter().chain(&self.removed)
    }

    /// Files to send through the analyzer.
    pub fn to_index(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(&self.modified)
    }
}

#[must_use]
pub fn plan_changes(state: &WorkspaceState, current: &BTreeMap<String, FileState>) -> ChangePlan {
    let mut plan = ChangePlan::default();
    for (path, now) in current {
        match state.files.get(path) {
            None => plan.added.push(path.clone()),
            Some(prev) if prev != now => plan.modified.push(path.clone()),
            Some(_) => plan.unchanged += 1,
        }
    }
    plan.removed = state
        .files
        .keys()
        .filter(|p| !current.contains_key(*p))
        .cloned()
        .collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs(modified_ns: u64, size: u64) -> FileState {
        FileState { modified_ns, size }
    }

    fn state_of(entries: &[(&str, FileState)]) -> WorkspaceState {
        WorkspaceState {
            last_indexed: 1,
            files: entries.iter().map(|(p, s)| ((*p).to_string(), *s)).collect(),
        }
    }

    #[test]
    fn plan_marks_removed_and_added_leaves_unchanged() {
        let state = state_of(&[("/w/a.go", fs(1, 10)), ("/w/b.go", fs(2, 20))]);
        let current = state_of(&[("/w/a.go", fs(1, 10)), ("/w/c.go", fs(3, 30))]).files;

        let plan = plan_changes(&state, &current);
        assert_eq!(plan.added, vec!["/w/c.go"]);
        assert!(plan.modified.is_empty());
        assert_eq!(plan.removed, vec!["/w/b.go"]);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.to_purge().collect::<Vec<_>>(), vec!["/w/b.go"]);
        assert_eq!(plan.to_index().collect::<Vec<_>>(), vec!["/w/c.go"]);
    }

    #[test]
    fn size_or_mtime_change_is_modification() {
        let state = state_of(&[("/w/a.rs", fs(1, 10)), ("/w/b.rs", fs(5, 50))]);
        let current = state_of(&[("/w/a.rs", fs(2, 10)), ("/w/b.rs", fs(5, 51))]).files;

        let plan = plan_changes(&state, &current);
        assert_eq!(plan.modified, vec!["/w/a.rs", "/w/b.rs"]);
        assert_eq!(plan.to_purge().count(), 2);
        assert_eq!(plan.to_index().count(), 2);
    }

    #[test]
    fn identical_state_yields_empty_plan() {
        let state = state_of(&[("/w/a.py", fs(1, 1))]);
        let plan = plan_changes(&state, &state.files);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn apply_advances_and_forgets() {
        let mut state = state_of(&[("/w/a.rs", fs(1, 10)), ("/w/b.rs", fs(2, 20))]);
        let indexed = BTreeMap::from([("/w/a.rs".to_string(), fs(9, 99))]);
        state.apply(&indexed, &["/w/b.rs".to_string()]);
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["/w/a.rs"], fs(9, 99));
        assert!(state.last_indexed > 1);
    }

    #[tokio::test]
    async fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(dir.path(), ".quarry", Lang::Go);
        let state = state_of(&[("/w/main.go", fs(42, 7))]);
        state.save(&path).await.unwrap();

        assert!(path.ends_with(".quarry/state-go.json"));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(WorkspaceState::load(&path).await, state);
    }

    #[tokio::test]
    async fn load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = WorkspaceState::load(&dir.path().join("nope.json")).await;
        assert_eq!(state, WorkspaceState::default());
    }

    #[tokio::test]
    async fn load_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state-rust.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(WorkspaceState::load(&path).await, WorkspaceState::default());
    }

    #[test]
    fn snapshot_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.rs");
        std::fs::write(&present, "fn a() {}").unwrap();
        let snap = snapshot(&[present.clone(), dir.path().join("gone.rs")]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[present.to_string_lossy().as_ref()].size, 9);
    }
}
