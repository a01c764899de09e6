//! Per-(workspace, language) storage handles and incremental indexing runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use quarry_llm::EmbeddingProvider;
use quarry_store::{ScoredVectorPoint, VectorStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::analyzer::{Analyzer, SourceAnalyzer};
use crate::error::{IndexError, Result};
use crate::hybrid::{self, HybridHit};
use crate::indexer::{FILE_FIELD, Indexer};
use crate::languages::Lang;
use crate::scanner::{ScanResult, scan_workspace};
use crate::state::{ChangePlan, FileState, WorkspaceState, plan_changes, snapshot, state_path};
use crate::sync_map::SharedMap;
use crate::workspace::WorkspaceInfo;

/// Text embedded once per collection to learn the vector size.
const PROBE_TEXT: &str = "sentinel";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Start a run as soon as a new collection is created.
    pub auto_index: bool,
    /// Distinct workspaces that may hold open collections at once.
    pub max_workspaces: usize,
    /// Workspace-relative directory holding state files.
    pub state_dir: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_index: true,
            max_workspaces: 10,
            state_dir: ".quarry".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    workspace_id: String,
    language: Lang,
}

impl IndexKey {
    fn new(workspace_id: &str, language: Lang) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            language,
        }
    }
}

/// A language-scoped collection of one workspace.
#[derive(Clone)]
pub struct StorageHandle {
    workspace: WorkspaceInfo,
    language: Lang,
    collection: String,
    store: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("workspace", &self.workspace.id())
            .field("language", &self.language)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl StorageHandle {
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceInfo {
        &self.workspace
    }

    #[must_use]
    pub fn language(&self) -> Lang {
        self.language
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// # Errors
    ///
    /// Returns [`IndexError::StorageFailed`] if the store query fails.
    pub async fn search(&self, vector: Vec<f32>, limit: u64) -> Result<Vec<ScoredVectorPoint>> {
        Ok(self.store.search(&self.collection, vector, limit).await?)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::StorageFailed`] if the count fails.
    pub async fn point_count(&self) -> Result<u64> {
        Ok(self.store.point_count(&self.collection).await?)
    }

    /// Drop every chunk stored for `file`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::StorageFailed`] if the delete fails.
    pub async fn delete_file(&self, file: &str) -> Result<()> {
        Ok(self
            .store
            .delete_by_metadata(&self.collection, FILE_FIELD, file)
            .await?)
    }
}

/// Whether a collection can be searched yet.
#[derive(Debug, Clone)]
pub enum Readiness {
    Ready(StorageHandle),
    /// No collection exists; indexing has to be triggered.
    NotIndexed,
    /// A run is in progress; retry shortly.
    Indexing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTrigger {
    Started,
    AlreadyRunning,
}

/// Summary of one incremental run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
    pub errors: Vec<String>,
    /// The scan fingerprint differs from the previous run of this process.
    pub layout_changed: bool,
    pub duration_ms: u64,
}

enum Opened {
    Cached,
    Created,
    Existing,
}

struct Survey {
    state: WorkspaceState,
    scan: ScanResult,
    current: BTreeMap<String, FileState>,
    plan: ChangePlan,
}

/// Clears the indexing flag for its key when dropped.
struct IndexingGuard {
    flags: SharedMap<IndexKey, Instant>,
    key: IndexKey,
}

impl Drop for IndexingGuard {
    fn drop(&mut self) {
        self.flags.remove(&self.key);
    }
}

/// Workspaces whose collections are being opened, with the number of pending opens.
type Reservations = Arc<Mutex<HashMap<String, usize>>>;

/// Counts a workspace against the limit until its handle is cached.
struct WorkspaceSlot {
    reservations: Reservations,
    workspace_id: String,
}

impl Drop for WorkspaceSlot {
    fn drop(&mut self) {
        let mut pending = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = pending.get_mut(&self.workspace_id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&self.workspace_id);
            }
        }
    }
}

struct Inner<P> {
    provider: Arc<P>,
    store: Arc<dyn VectorStore>,
    analyzer: Arc<dyn Analyzer>,
    config: CoordinatorConfig,
    handles: SharedMap<IndexKey, StorageHandle>,
    reservations: Reservations,
    indexing: SharedMap<IndexKey, Instant>,
    fingerprints: SharedMap<IndexKey, String>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Owns storage handles and background runs for every open workspace.
///
/// Cheap to clone; clones share all state.
pub struct IndexCoordinator<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for IndexCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: EmbeddingProvider + 'static> IndexCoordinator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<dyn VectorStore>, config: CoordinatorConfig) -> Self {
        Self::with_analyzer(provider, store, Arc::new(SourceAnalyzer), config)
    }

    #[must_use]
    pub fn with_analyzer(
        provider: Arc<P>,
        store: Arc<dyn VectorStore>,
        analyzer: Arc<dyn Analyzer>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                analyzer,
                config,
                handles: SharedMap::default(),
                reservations: Reservations::default(),
                indexing: SharedMap::default(),
                fingerprints: SharedMap::default(),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    /// Resolve the collection for `(info, lang)`, creating it on first use.
    ///
    /// A new collection starts a background run when `auto_index` is set. An
    /// existing one is checked for changed files in the background instead.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::WorkspaceLimitExceeded`],
    /// [`IndexError::CollectionUnavailable`] or [`IndexError::EmbeddingFailed`]
    /// when the dimension probe fails.
    pub async fn get_storage(&self, info: &WorkspaceInfo, lang: Lang) -> Result<StorageHandle> {
        let (handle, opened) = self.open_handle(info, lang).await?;
        match opened {
            Opened::Cached => {}
            Opened::Created => {
                if self.inner.config.auto_index {
                    self.start_indexing(info, lang);
                }
            }
            Opened::Existing => self.spawn_change_check(info.clone(), lang),
        }
        Ok(handle)
    }

    async fn open_handle(&self, info: &WorkspaceInfo, lang: Lang) -> Result<(StorageHandle, Opened)> {
        let key = IndexKey::new(info.id(), lang);
        if let Some(handle) = self.inner.handles.get(&key) {
            tracing::debug!(collection = %handle.collection, "storage handle cache hit");
            return Ok((handle, Opened::Cached));
        }
        let _slot = self.reserve_slot(info.id())?;

        let collection = info.collection_name(lang);
        let created = self.open_collection(&collection).await?;
        let handle = StorageHandle {
            workspace: info.clone(),
            language: lang,
            collection,
            store: Arc::clone(&self.inner.store),
        };
        let handle = self.inner.handles.get_or_insert_with(key, || handle);
        let opened = if created { Opened::Created } else { Opened::Existing };
        Ok((handle, opened))
    }

    /// Check the workspace limit and hold a slot across the collection open.
    ///
    /// Open handles and pending reservations are counted under one lock, so
    /// concurrent opens of new workspaces cannot all pass the check.
    fn reserve_slot(&self, workspace_id: &str) -> Result<WorkspaceSlot> {
        let mut pending = self
            .inner
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut open: HashSet<String> = self
            .inner
            .handles
            .values()
            .into_iter()
            .map(|h| h.workspace.id().to_string())
            .collect();
        open.extend(pending.keys().cloned());

        let limit = self.inner.config.max_workspaces;
        if !open.contains(workspace_id) && open.len() >= limit {
            return Err(IndexError::WorkspaceLimitExceeded { limit });
        }
        *pending.entry(workspace_id.to_string()).or_insert(0) += 1;
        Ok(WorkspaceSlot {
            reservations: Arc::clone(&self.inner.reservations),
            workspace_id: workspace_id.to_string(),
        })
    }

    /// Returns `true` if the collection had to be created.
    async fn open_collection(&self, collection: &str) -> Result<bool> {
        let exists = self
            .inner
            .store
            .collection_exists(collection)
            .await
            .map_err(|e| IndexError::CollectionUnavailable(format!("{collection}: {e}")))?;
        if exists {
            return Ok(false);
        }

        let probe = self.inner.provider.embed(PROBE_TEXT).await?;
        let vector_size = u64::try_from(probe.len())
            .map_err(|e| IndexError::Other(format!("vector size: {e}")))?;
        self.inner
            .store
            .create_collection(collection, vector_size)
            .await
            .map_err(|e| IndexError::CollectionUnavailable(format!("{collection}: {e}")))?;
        tracing::info!(collection, vector_size, "collection created");
        Ok(true)
    }

    fn try_claim(&self, key: &IndexKey) -> Option<IndexingGuard> {
        self.inner
            .indexing
            .insert_if_absent(key.clone(), Instant::now())
            .then(|| IndexingGuard {
                flags: self.inner.indexing.clone(),
                key: key.clone(),
            })
    }

    #[must_use]
    pub fn is_indexing(&self, workspace_id: &str, lang: Lang) -> bool {
        self.inner.indexing.contains(&IndexKey::new(workspace_id, lang))
    }

    /// Launch an incremental run in the background and return immediately.
    pub fn start_indexing(&self, info: &WorkspaceInfo, lang: Lang) -> IndexTrigger {
        let key = IndexKey::new(info.id(), lang);
        let Some(guard) = self.try_claim(&key) else {
            tracing::debug!(workspace = %info.id(), language = %lang, "indexing already in progress");
            return IndexTrigger::AlreadyRunning;
        };

        let this = self.clone();
        let info = info.clone();
        self.inner.tracker.spawn(async move {
            let _guard = guard;
            match this.run(&info, lang).await {
                Ok(_) => {}
                Err(IndexError::Cancelled) => {
                    tracing::info!(workspace = %info.id(), language = %lang, "indexing cancelled");
                }
                Err(e) => {
                    tracing::error!(workspace = %info.id(), language = %lang, "indexing failed: {e:#}");
                }
            }
        });
        IndexTrigger::Started
    }

    /// Run an incremental pass on the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::AlreadyIndexing`] if a run for the same key is in
    /// progress, or whatever aborted the run.
    pub async fn index_now(&self, info: &WorkspaceInfo, lang: Lang) -> Result<IndexReport> {
        let key = IndexKey::new(info.id(), lang);
        let Some(_guard) = self.try_claim(&key) else {
            return Err(IndexError::AlreadyIndexing {
                workspace: info.id().to_string(),
                language: lang,
            });
        };
        self.run(info, lang).await
    }

    async fn run(&self, info: &WorkspaceInfo, lang: Lang) -> Result<IndexReport> {
        let (handle, _) = self.open_handle(info, lang).await?;
        self.run_incremental(&handle).await
    }

    async fn survey(&self, root: &Path, lang: Lang) -> Result<Survey> {
        let state = WorkspaceState::load(&state_path(root, &self.inner.config.state_dir, lang)).await;
        let root = root.to_path_buf();
        let (scan, current) = tokio::task::spawn_blocking(move || {
            let scan = scan_workspace(&root);
            let current = snapshot(&scan.tracked_files(lang));
            (scan, current)
        })
        .await?;
        let plan = plan_changes(&state, &current);
        Ok(Survey {
            state,
            scan,
            current,
            plan,
        })
    }

    async fn run_incremental(&self, handle: &StorageHandle) -> Result<IndexReport> {
        let start = Instant::now();
        let info = &handle.workspace;
        let lang = handle.language;
        let cancel = &self.inner.cancel;
        tracing::info!(workspace = %info.id(), language = %lang, "indexing started");

        let Survey {
            mut state,
            scan,
            current,
            plan,
        } = self.survey(info.root(), lang).await?;
        let mut report = IndexReport {
            files_scanned: current.len(),
            ..IndexReport::default()
        };
        tracing::debug!(
            workspace = %info.id(),
            language = %lang,
            added = plan.added.len(),
            modified = plan.modified.len(),
            removed = plan.removed.len(),
            unchanged = plan.unchanged,
            "change plan computed"
        );

        let purge: Vec<String> = plan.to_purge().cloned().collect();
        for file in &purge {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            handle.delete_file(file).await?;
        }
        report.files_deleted = plan.removed.len();

        let to_index: Vec<PathBuf> = plan.to_index().map(PathBuf::from).collect();
        let analyzer = Arc::clone(&self.inner.analyzer);
        let analysis =
            tokio::task::spawn_blocking(move || analyzer.analyze_paths(lang, &to_index)).await??;

        let indexer = Indexer::new(Arc::clone(&self.inner.provider), Arc::clone(&self.inner.store));
        let count = indexer
            .index_chunks(&handle.collection, &analysis.chunks, cancel)
            .await?;
        report.chunks_indexed = count.indexed;
        report.chunks_skipped = count.skipped;
        report.errors = analysis
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.path.display(), f.error))
            .collect();

        let failed: HashSet<String> = analysis
            .failures
            .iter()
            .map(|f| f.path.to_string_lossy().into_owned())
            .collect();
        let indexed: Vec<(&String, &FileState)> = plan
            .to_index()
            .filter(|p| !failed.contains(*p))
            .filter_map(|p| current.get_key_value(p))
            .collect();
        report.files_indexed = indexed.len();
        state.apply(indexed, &plan.removed);
        state
            .save(&state_path(info.root(), &self.inner.config.state_dir, lang))
            .await?;

        let fingerprint = scan.fingerprint(lang);
        let previous = self
            .inner
            .fingerprints
            .insert(IndexKey::new(info.id(), lang), fingerprint.clone());
        report.layout_changed = previous.is_none_or(|p| p != fingerprint);
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        tracing::info!(
            workspace = %info.id(),
            language = %lang,
            files = report.files_indexed,
            deleted = report.files_deleted,
            chunks = report.chunks_indexed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    fn spawn_change_check(&self, info: WorkspaceInfo, lang: Lang) {
        let this = self.clone();
        self.inner.tracker.spawn(async move {
            match this.survey(info.root(), lang).await {
                Ok(survey) if survey.plan.is_empty() => {
                    tracing::debug!(workspace = %info.id(), language = %lang, "index up to date");
                }
                Ok(_) => {
                    this.start_indexing(&info, lang);
                }
                Err(e) => {
                    tracing::warn!(workspace = %info.id(), language = %lang, "change check failed: {e:#}");
                }
            }
        });
    }

    /// Distinguish searchable, missing and in-progress collections.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::CollectionUnavailable`] if the existence check fails.
    pub async fn readiness(&self, info: &WorkspaceInfo, lang: Lang) -> Result<Readiness> {
        if self.is_indexing(info.id(), lang) {
            return Ok(Readiness::Indexing);
        }
        if let Some(handle) = self.inner.handles.get(&IndexKey::new(info.id(), lang)) {
            return Ok(Readiness::Ready(handle));
        }
        let collection = info.collection_name(lang);
        let exists = self
            .inner
            .store
            .collection_exists(&collection)
            .await
            .map_err(|e| IndexError::CollectionUnavailable(format!("{collection}: {e}")))?;
        if !exists {
            return Ok(Readiness::NotIndexed);
        }
        Ok(Readiness::Ready(StorageHandle {
            workspace: info.clone(),
            language: lang,
            collection,
            store: Arc::clone(&self.inner.store),
        }))
    }

    /// Detected languages, or every language with files when detection found none.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback scan task fails.
    pub async fn workspace_languages(&self, info: &WorkspaceInfo) -> Result<Vec<Lang>> {
        if !info.languages().is_empty() {
            return Ok(info.languages().to_vec());
        }
        let root = info.root().to_path_buf();
        let scan = tokio::task::spawn_blocking(move || scan_workspace(&root)).await?;
        Ok(scan.languages())
    }

    /// Open storage and start a run for every language of the workspace.
    ///
    /// # Errors
    ///
    /// Returns the first storage resolution failure.
    pub async fn ensure_workspace_indexed(
        &self,
        info: &WorkspaceInfo,
    ) -> Result<Vec<(Lang, IndexTrigger)>> {
        let mut triggers = Vec::new();
        for lang in self.workspace_languages(info).await? {
            self.open_handle(info, lang).await?;
            triggers.push((lang, self.start_indexing(info, lang)));
        }
        Ok(triggers)
    }

    /// Background [`Self::ensure_workspace_indexed`]; failures are logged.
    pub fn spawn_ensure_indexed(&self, info: WorkspaceInfo) {
        let this = self.clone();
        self.inner.tracker.spawn(async move {
            if let Err(e) = this.ensure_workspace_indexed(&info).await {
                tracing::warn!(workspace = %info.id(), "ensure indexed failed: {e:#}");
            }
        });
    }

    /// Every open handle, ordered by collection name.
    #[must_use]
    pub fn open_handles(&self) -> Vec<StorageHandle> {
        let mut handles = self.inner.handles.values();
        handles.sort_by(|a, b| a.collection.cmp(&b.collection));
        handles
    }

    /// Scan fingerprint recorded by the last completed run in this process.
    #[must_use]
    pub fn last_fingerprint(&self, workspace_id: &str, lang: Lang) -> Option<String> {
        self.inner.fingerprints.get(&IndexKey::new(workspace_id, lang))
    }

    /// Hybrid search across every open collection.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NoCollections`] when nothing is open, or the first
    /// failure when every collection fails.
    pub async fn search_all(&self, query: &str, limit: usize) -> Result<Vec<HybridHit>> {
        let handles = self.open_handles();
        hybrid::search_collections(self.inner.provider.as_ref(), &handles, query, limit).await
    }

    /// Wait for every run started so far, including runs they trigger.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        if !self.inner.cancel.is_cancelled() {
            self.inner.tracker.reopen();
        }
    }

    /// Cancel in-flight runs and wait for them to stop.
    pub async fn shutdown(&self) {
        tracing::info!(running = self.inner.tracker.len(), "shutting down index coordinator");
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}
