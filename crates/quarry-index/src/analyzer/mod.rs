//! Turning files into semantic chunks.
//!
//! [`Analyzer`] is the pluggable seam; [`SourceAnalyzer`] is the built-in
//! implementation backed by tree-sitter for source files and pulldown-cmark
//! for documentation.

mod markdown;
mod source;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, is_documentation};

/// Where a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    Code,
    Docs,
}

impl ChunkSource {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Docs => "docs",
        }
    }
}

/// One semantically meaningful unit: a function, method, type or doc section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticChunk {
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub name: String,
    pub kind: String,
    pub signature: String,
    pub docstring: String,
    pub code: String,
    pub package: String,
    /// Enclosing type, class, trait or module for nested entities.
    pub parent: Option<String>,
    pub language: Lang,
    pub source: ChunkSource,
}

#[derive(Debug, Clone)]
pub struct AnalysisFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Chunks for every file that could be analyzed, plus the ones that could not.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub chunks: Vec<SemanticChunk>,
    pub failures: Vec<AnalysisFailure>,
}

impl Analysis {
    #[must_use]
    pub fn failed_paths(&self) -> HashSet<&Path> {
        self.failures.iter().map(|f| f.path.as_path()).collect()
    }
}

/// Capability turning a batch of files into chunks.
///
/// Implementations are synchronous; the coordinator runs them on the blocking
/// pool. A file that cannot be read or parsed is reported in
/// [`Analysis::failures`] and must not fail the whole batch.
pub trait Analyzer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error only when the batch as a whole cannot be processed.
    fn analyze_paths(&self, lang: Lang, paths: &[PathBuf]) -> Result<Analysis>;
}

/// Built-in analyzer covering every [`Lang`] and markdown documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceAnalyzer;

impl SourceAnalyzer {
    /// Analyze one in-memory file.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed.
    pub fn analyze_source(lang: Lang, path: &Path, text: &str) -> Result<Vec<SemanticChunk>> {
        if is_documentation(path) {
            Ok(markdown::split_sections(lang, path, text))
        } else {
            source::extract_entities(lang, path, text)
        }
    }
}

impl Analyzer for SourceAnalyzer {
    fn analyze_paths(&self, lang: Lang, paths: &[PathBuf]) -> Result<Analysis> {
        let mut analysis = Analysis::default();
        for path in paths {
            let outcome = std::fs::read_to_string(path)
                .map_err(IndexError::from)
                .and_then(|text| Self::analyze_source(lang, path, &text));
            match outcome {
                Ok(chunks) => {
                    tracing::debug!(path = %path.display(), chunks = chunks.len(), "file analyzed");
                    analysis.chunks.extend(chunks);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), language = %lang, "analysis failed: {e:#}");
                    analysis.failures.push(AnalysisFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_paths_collects_chunks_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("lib.rs");
        std::fs::write(&good, "/// Adds.\npub fn add(a: i32, b: i32) -> i32 { a + b }\n").unwrap();
        let doc = dir.path().join("README.md");
        std::fs::write(&doc, "# Intro\nhello\n").unwrap();
        let missing = dir.path().join("gone.rs");

        let analysis = SourceAnalyzer
            .analyze_paths(Lang::Rust, &[good, doc, missing.clone()])
            .unwrap();

        assert_eq!(analysis.chunks.len(), 2);
        assert_eq!(analysis.chunks[0].name, "add");
        assert_eq!(analysis.chunks[1].source, ChunkSource::Docs);
        assert_eq!(analysis.failures.len(), 1);
        assert!(analysis.failed_paths().contains(missing.as_path()));
    }

    #[test]
    fn non_utf8_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bin.py");
        std::fs::write(&bad, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        let analysis = SourceAnalyzer.analyze_paths(Lang::Python, &[bad]).unwrap();
        assert!(analysis.chunks.is_empty());
        assert_eq!(analysis.failures.len(), 1);
    }

    #[test]
    fn chunk_source_ids() {
        assert_eq!(ChunkSource::Code.id(), "code");
        assert_eq!(ChunkSource::Docs.id(), "docs");
    }
}
