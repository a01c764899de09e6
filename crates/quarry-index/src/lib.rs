//! Workspace-aware incremental semantic code index.
//!
//! A path is resolved to a workspace root by [`workspace::WorkspaceDetector`],
//! inventoried by the [`scanner`], diffed against the persisted per-file
//! [`state`], and the changed files are analyzed, embedded and upserted by the
//! [`coordinator::IndexCoordinator`]. [`watcher`] keeps the index fresh after
//! edits and [`hybrid`] ranks retrieved chunks by semantic and lexical signal.

pub mod analyzer;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod hybrid;
pub mod indexer;
pub mod languages;
pub mod scanner;
pub mod state;
pub(crate) mod sync_map;
pub mod watcher;
pub mod workspace;

pub use coordinator::{
    CoordinatorConfig, IndexCoordinator, IndexReport, IndexTrigger, Readiness, StorageHandle,
};
pub use error::{IndexError, Result};
pub use hybrid::HybridHit;
pub use languages::Lang;
pub use watcher::WatcherRegistry;
pub use workspace::{DetectorConfig, WorkspaceDetector, WorkspaceInfo};
