//! Workspace root detection.
//!
//! A workspace is the nearest ancestor directory carrying at least one marker
//! (a build manifest or `.git`). Its identity is a short hash of the canonical
//! root path, so the same root always maps to the same collections.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DetectionCache;
use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Markers in priority order. The first one found decides the project type.
pub const DEFAULT_MARKERS: &[&str] = &[
    "go.mod",
    "Cargo.toml",
    "tsconfig.json",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    ".git",
];

pub const DEFAULT_COLLECTION_PREFIX: &str = "quarry";

const ID_LEN: usize = 16;

/// Project type and language implied by a marker name.
#[must_use]
pub fn marker_profile(marker: &str) -> (&'static str, Option<Lang>) {
    match marker {
        "go.mod" => ("go", Some(Lang::Go)),
        "Cargo.toml" => ("rust", Some(Lang::Rust)),
        "tsconfig.json" => ("typescript", Some(Lang::TypeScript)),
        "package.json" => ("node", Some(Lang::JavaScript)),
        "pyproject.toml" | "setup.py" | "requirements.txt" => ("python", Some(Lang::Python)),
        ".git" => ("git", None),
        _ => ("unknown", None),
    }
}

/// Identity of a detected project. Immutable once returned by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    root: PathBuf,
    id: String,
    project_type: String,
    languages: Vec<Lang>,
    markers: Vec<String>,
    collection_prefix: String,
}

impl WorkspaceInfo {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    #[must_use]
    pub fn languages(&self) -> &[Lang] {
        &self.languages
    }

    #[must_use]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    #[must_use]
    pub fn collection_prefix(&self) -> &str {
        &self.collection_prefix
    }

    /// `{prefix}_{id}_{lang}`
    #[must_use]
    pub fn collection_name(&self, lang: Lang) -> String {
        format!("{}_{}_{}", self.collection_prefix, self.id, lang.id())
    }
}

/// Deterministic short id of a canonical root path.
#[must_use]
pub fn workspace_id(root: &Path) -> String {
    let hash = blake3::hash(root.as_os_str().as_encoded_bytes());
    hash.to_hex()[..ID_LEN].to_string()
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Marker names in priority order.
    pub markers: Vec<String>,
    /// A path containing any of these substrings is never treated as a workspace.
    pub exclude: Vec<String>,
    pub collection_prefix: String,
    /// Directories under which a marker-less fallback is refused.
    pub reject_prefixes: Vec<PathBuf>,
    pub cache_ttl: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(ToString::to_string).collect(),
            exclude: Vec::new(),
            collection_prefix: DEFAULT_COLLECTION_PREFIX.into(),
            reject_prefixes: vec![std::env::temp_dir()],
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Resolve `path` to its workspace without consulting any cache.
///
/// # Errors
///
/// Returns [`IndexError::ExcludedPath`] if the absolute path matches an
/// exclusion pattern, or [`IndexError::WorkspaceNotFound`] if no ancestor has a
/// marker and the fallback directory is the filesystem root, the home
/// directory, or lies under a rejected prefix.
pub fn detect_workspace(path: &Path, config: &DetectorConfig) -> Result<WorkspaceInfo> {
    let absolute = std::path::absolute(path)?;
    let absolute = absolute.canonicalize().unwrap_or(absolute);

    let lossy = absolute.to_string_lossy();
    if let Some(pattern) = config
        .exclude
        .iter()
        .find(|p| !p.is_empty() && lossy.contains(p.as_str()))
    {
        return Err(IndexError::ExcludedPath {
            path: absolute,
            pattern: pattern.clone(),
        });
    }

    let start = if absolute.is_dir() {
        absolute.clone()
    } else {
        absolute
            .parent()
            .map_or_else(|| absolute.clone(), Path::to_path_buf)
    };

    for dir in start.ancestors() {
        let found: Vec<&String> = config
            .markers
            .iter()
            .filter(|m| dir.join(m.as_str()).exists())
            .collect();
        if !found.is_empty() {
            tracing::debug!(root = %dir.display(), markers = ?found, "workspace root found");
            return Ok(build_info(dir, &found, config));
        }
    }

    if is_rejected_fallback(&start, config) {
        return Err(IndexError::WorkspaceNotFound {
            path: absolute,
            expected: config.markers.clone(),
        });
    }
    tracing::debug!(root = %start.display(), "no marker found, using input directory");
    Ok(build_info(&start, &[], config))
}

fn build_info(root: &Path, found: &[&String], config: &DetectorConfig) -> WorkspaceInfo {
    let project_type = found
        .first()
        .map_or("unknown", |m| marker_profile(m).0)
        .to_string();
    let mut languages = Vec::new();
    for marker in found {
        if let (_, Some(lang)) = marker_profile(marker)
            && !languages.contains(&lang)
        {
            languages.push(lang);
        }
    }
    WorkspaceInfo {
        root: root.to_path_buf(),
        id: workspace_id(root),
        project_type,
        languages,
        markers: found.iter().map(|m| (*m).clone()).collect(),
        collection_prefix: config.collection_prefix.clone(),
    }
}

fn is_rejected_fallback(dir: &Path, config: &DetectorConfig) -> bool {
    if dir.parent().is_none() {
        return true;
    }
    if let Some(home) = dirs::home_dir()
        && same_dir(dir, &home)
    {
        return true;
    }
    config.reject_prefixes.iter().any(|prefix| {
        let canonical = prefix.canonicalize().unwrap_or_else(|_| prefix.clone());
        dir.starts_with(&canonical) || dir.starts_with(prefix)
    })
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let b_canonical = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a == b || a == b_canonical
}

/// Detector with a short-lived memo of results keyed by input path.
#[derive(Debug)]
pub struct WorkspaceDetector {
    config: DetectorConfig,
    cache: DetectionCache,
}

impl WorkspaceDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        let cache = DetectionCache::new(config.cache_ttl);
        Self { config, cache }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Cached [`detect_workspace`].
    ///
    /// # Errors
    ///
    /// See [`detect_workspace`]. Errors are not cached.
    pub fn detect(&self, path: &Path) -> Result<WorkspaceInfo> {
        if let Some(hit) = self.cache.get(path) {
            tracing::debug!(path = %path.display(), workspace = %hit.id(), "detection cache hit");
            return Ok(hit);
        }
        let info = detect_workspace(path, &self.config)?;
        self.cache.set(path.to_path_buf(), info.clone());
        Ok(info)
    }
}
