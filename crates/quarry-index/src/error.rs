//! Error types for quarry-index.

use std::path::PathBuf;

use crate::languages::Lang;

/// Errors that can occur during detection, indexing and search.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No ancestor carries a marker and the fallback directory was rejected.
    #[error("no workspace found for {}: expected one of [{}] in it or an ancestor", path.display(), expected.join(", "))]
    WorkspaceNotFound { path: PathBuf, expected: Vec<String> },

    #[error("path {} is excluded by pattern {pattern:?}", path.display())]
    ExcludedPath { path: PathBuf, pattern: String },

    #[error("workspace limit of {limit} open workspaces reached")]
    WorkspaceLimitExceeded { limit: usize },

    #[error("indexing already in progress for workspace {workspace} ({language})")]
    AlreadyIndexing { workspace: String, language: Lang },

    /// Collection existence check or creation failed.
    #[error("collection unavailable: {0}")]
    CollectionUnavailable(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(#[from] quarry_llm::LlmError),

    #[error("vector store operation failed: {0}")]
    StorageFailed(#[from] quarry_store::VectorStoreError),

    /// Persisted state could not be decoded. Recovered as empty state, never returned from a run.
    #[error("state file corrupt: {0}")]
    StateCorrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tree-sitter or markdown parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Aggregated search found no open collection to query.
    #[error("no indexed collections are open")]
    NoCollections,

    /// The run observed shutdown and stopped early.
    #[error("indexing cancelled")]
    Cancelled,

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Other(format!("background task failed: {e}"))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
