//! One-pass workspace inventory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::languages::{Lang, detect_language, is_documentation};

/// Directory names skipped together with their subtrees.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".idea",
    ".vscode",
    "node_modules",
    "vendor",
    "dist",
    "build",
    "storage",
    "public",
];

#[must_use]
pub fn is_skipped_dir_name(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

/// Files and directories found by one walk. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    files: BTreeMap<Lang, Vec<PathBuf>>,
    dirs: BTreeMap<Lang, BTreeSet<PathBuf>>,
    docs: Vec<PathBuf>,
    total_files: usize,
}

impl ScanResult {
    /// Source files of `lang`, in walk order.
    #[must_use]
    pub fn files(&self, lang: Lang) -> &[PathBuf] {
        self.files.get(&lang).map_or(&[], Vec::as_slice)
    }

    /// Distinct directories holding at least one `lang` file, sorted.
    #[must_use]
    pub fn dirs(&self, lang: Lang) -> Vec<&Path> {
        self.dirs
            .get(&lang)
            .map(|d| d.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn docs(&self) -> &[PathBuf] {
        &self.docs
    }

    #[must_use]
    pub fn total_files(&self) -> usize {
        self.total_files
    }

    /// Languages with at least one source file.
    #[must_use]
    pub fn languages(&self) -> Vec<Lang> {
        self.files
            .iter()
            .filter(|(_, f)| !f.is_empty())
            .map(|(l, _)| *l)
            .collect()
    }

    /// Everything a `lang` run tracks: its source files plus all documentation.
    #[must_use]
    pub fn tracked_files(&self, lang: Lang) -> Vec<PathBuf> {
        self.files(lang)
            .iter()
            .chain(&self.docs)
            .cloned()
            .collect()
    }

    /// Cheap "might something have changed" hash for `lang`.
    ///
    /// Covers file count, doc count, the sorted directory list and the sorted
    /// doc list. File contents are not part of it; the per-file state diff is
    /// authoritative.
    #[must_use]
    pub fn fingerprint(&self, lang: Lang) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("files:{}\n", self.files(lang).len()).as_bytes());
        hasher.update(format!("docs:{}\n", self.docs.len()).as_bytes());
        for dir in self.dirs(lang) {
            hasher.update(dir.as_os_str().as_encoded_bytes());
            hasher.update(b"\n");
        }
        let mut docs: Vec<&PathBuf> = self.docs.iter().collect();
        docs.sort();
        for doc in docs {
            hasher.update(doc.as_os_str().as_encoded_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Walk `root` once, classifying files by extension.
///
/// Blocking: call from `spawn_blocking` in async contexts.
#[must_use]
pub fn scan_workspace(root: &Path) -> ScanResult {
    let mut result = ScanResult::default();

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.depth() > 0 && is_skipped_dir_name(&entry.file_name().to_string_lossy()))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("scan entry skipped: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        result.total_files += 1;
        let path = entry.into_path();

        if is_documentation(&path) {
            result.docs.push(path);
        } else if let Some(lang) = detect_language(&path) {
            if let Some(parent) = path.parent() {
                result
                    .dirs
                    .entry(lang)
                    .or_default()
                    .insert(parent.to_path_buf());
            }
            result.files.entry(lang).or_default().push(path);
        }
    }

    tracing::debug!(
        root = %root.display(),
        total = result.total_files,
        docs = result.docs.len(),
        languages = ?result.languages(),
        "workspace scanned"
    );
    result
}
