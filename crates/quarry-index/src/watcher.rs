//! Filesystem watching with a single-slot debounce.
//!
//! Each workspace root gets one [`WorkspaceWatcher`]. Relevant events reset a
//! quiet-period timer; when it expires the coordinator re-checks every
//! language of the workspace.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use quarry_llm::EmbeddingProvider;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::coordinator::IndexCoordinator;
use crate::error::Result;
use crate::scanner::is_skipped_dir_name;
use crate::sync_map::SharedMap;
use crate::workspace::WorkspaceInfo;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Collapses bursts of [`Debouncer::poke`] calls into one callback per quiet period.
#[derive(Debug, Clone)]
pub struct Debouncer {
    notify: Arc<Notify>,
}

impl Debouncer {
    pub fn spawn(
        tracker: &TaskTracker,
        quiet: Duration,
        cancel: CancellationToken,
        on_quiet: impl Fn() + Send + 'static,
    ) -> Self {
        let notify = Arc::new(Notify::new());
        let events = Arc::clone(&notify);
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = events.notified() => {}
                }
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = events.notified() => tracing::debug!("debounce reset"),
                        () = tokio::time::sleep(quiet) => break,
                    }
                }
                on_quiet();
            }
        });
        Self { notify }
    }

    /// Record an event. Never blocks; at most one pending event is kept.
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}

fn is_ignored_dir_name(name: &str) -> bool {
    is_skipped_dir_name(name) || name.starts_with('.')
}

/// `path` lies below a skipped or hidden directory of `root`.
fn in_ignored_dir(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .any(|c| is_ignored_dir_name(&c.as_os_str().to_string_lossy()))
}

fn is_relevant(event: &Event, root: &Path) -> bool {
    match event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => false,
        _ => event.paths.iter().any(|p| !in_ignored_dir(root, p)),
    }
}

fn watch_dir(watcher: &Mutex<RecommendedWatcher>, dir: &Path) -> bool {
    let result = watcher
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .watch(dir, RecursiveMode::NonRecursive);
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "watch setup failed: {e:#}");
            false
        }
    }
}

/// Watch every non-ignored directory under `top` at depth `min_depth` or deeper.
fn watch_tree(watcher: &Mutex<RecommendedWatcher>, top: &Path, min_depth: usize) -> usize {
    let walker = ignore::WalkBuilder::new(top)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            entry.file_type().is_some_and(|t| t.is_dir())
                && !(entry.depth() > 0 && is_ignored_dir_name(&entry.file_name().to_string_lossy()))
        })
        .build();
    walker
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.depth() >= min_depth)
        .filter(|entry| watch_dir(watcher, entry.path()))
        .count()
}

/// Live watch over one workspace root.
pub struct WorkspaceWatcher {
    root: PathBuf,
    cancel: CancellationToken,
    _watcher: Arc<Mutex<RecommendedWatcher>>,
}

impl std::fmt::Debug for WorkspaceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceWatcher")
            .field("root", &self.root)
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WorkspaceWatcher {
    /// Watch `root` and its subdirectories, poking `debouncer` on every relevant event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::Watcher`] if the OS watcher cannot be
    /// created or `root` itself cannot be watched. Subdirectory failures are
    /// logged and skipped.
    pub fn start(
        root: &Path,
        debouncer: Debouncer,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (dir_tx, mut dir_rx) = mpsc::channel::<PathBuf>(64);
        let event_root = root.to_path_buf();
        let raw = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("watch error: {e}");
                    return;
                }
            };
            if !is_relevant(&event, &event_root) {
                return;
            }
            debouncer.poke();
            if matches!(event.kind, EventKind::Create(_)) {
                for path in event.paths {
                    let name_ignored = path
                        .file_name()
                        .is_some_and(|n| is_ignored_dir_name(&n.to_string_lossy()));
                    if path.is_dir() && !name_ignored && !in_ignored_dir(&event_root, &path) {
                        let _ = dir_tx.blocking_send(path);
                    }
                }
            }
        })?;
        let watcher = Arc::new(Mutex::new(raw));

        watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(root, RecursiveMode::NonRecursive)?;
        let watched = 1 + watch_tree(&watcher, root, 1);
        tracing::info!(root = %root.display(), dirs = watched, "watcher started");

        let task_watcher = Arc::clone(&watcher);
        let task_cancel = cancel.clone();
        tracker.spawn(async move {
            loop {
                let dir = tokio::select! {
                    () = task_cancel.cancelled() => break,
                    dir = dir_rx.recv() => match dir {
                        Some(dir) => dir,
                        None => break,
                    },
                };
                let watcher = Arc::clone(&task_watcher);
                let added = tokio::task::spawn_blocking(move || {
                    let added = watch_tree(&watcher, &dir, 0);
                    tracing::debug!(dir = %dir.display(), added, "new directory watched");
                    added
                })
                .await;
                if let Err(e) = added {
                    tracing::warn!("directory watch task failed: {e}");
                }
            }
        });

        Ok(Self {
            root: root.to_path_buf(),
            cancel,
            _watcher: watcher,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One watcher per workspace root, each re-indexing through the coordinator.
pub struct WatcherRegistry<P> {
    coordinator: IndexCoordinator<P>,
    quiet: Duration,
    watchers: SharedMap<PathBuf, Arc<WorkspaceWatcher>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<P: EmbeddingProvider + 'static> WatcherRegistry<P> {
    #[must_use]
    pub fn new(coordinator: IndexCoordinator<P>, quiet: Duration) -> Self {
        Self {
            coordinator,
            quiet,
            watchers: SharedMap::default(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start watching `info`'s root. Returns the existing watcher if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be watched.
    pub fn start(&self, info: &WorkspaceInfo) -> Result<Arc<WorkspaceWatcher>> {
        let root = info.root().to_path_buf();
        if let Some(existing) = self.watchers.get(&root) {
            return Ok(existing);
        }

        let cancel = self.cancel.child_token();
        let coordinator = self.coordinator.clone();
        let target = info.clone();
        let debouncer = Debouncer::spawn(&self.tracker, self.quiet, cancel.clone(), move || {
            tracing::info!(workspace = %target.id(), "changes settled, re-checking index");
            coordinator.spawn_ensure_indexed(target.clone());
        });
        let watcher = match WorkspaceWatcher::start(&root, debouncer, &self.tracker, cancel.clone()) {
            Ok(watcher) => Arc::new(watcher),
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        if self.watchers.insert_if_absent(root.clone(), Arc::clone(&watcher)) {
            return Ok(watcher);
        }
        // Lost a race with a concurrent start for the same root.
        watcher.stop();
        Ok(self.watchers.get(&root).unwrap_or(watcher))
    }

    /// Returns `false` if `root` was not watched.
    pub fn stop(&self, root: &Path) -> bool {
        match self.watchers.remove(&root.to_path_buf()) {
            Some(watcher) => {
                watcher.stop();
                tracing::info!(root = %root.display(), "watcher stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every watcher and wait for their tasks to finish.
    pub async fn stop_all(&self) {
        for watcher in self.watchers.drain() {
            watcher.stop();
        }
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    #[must_use]
    pub fn is_watching(&self, root: &Path) -> bool {
        self.watchers.contains(&root.to_path_buf())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};
    use quarry_llm::mock::MockProvider;
    use quarry_store::{InMemoryVectorStore, VectorStore};

    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::languages::Lang;
    use crate::state::state_path;
    use crate::workspace::{DetectorConfig, detect_workspace};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_fires_once() {
        let (count, on_quiet) = counter();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::spawn(&tracker, Duration::from_secs(5), cancel.clone(), on_quiet);

        for _ in 0..10 {
            debouncer.poke();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn separated_bursts_fire_separately() {
        let (count, on_quiet) = counter();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::spawn(&tracker, Duration::from_secs(5), cancel.clone(), on_quiet);

        debouncer.poke();
        tokio::time::sleep(Duration::from_secs(6)).await;
        debouncer.poke();
        debouncer.poke();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_debouncer_never_fires() {
        let (count, on_quiet) = counter();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::spawn(&tracker, Duration::from_secs(5), cancel.clone(), on_quiet);

        debouncer.poke();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn relevance_filter() {
        let root = Path::new("/w");
        let event = |kind: EventKind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), "/w/src/a.rs"), root));
        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/w/a.rs"),
            root
        ));
        assert!(!is_relevant(&event(EventKind::Access(AccessKind::Any), "/w/a.rs"), root));
        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), "/w/a.rs"),
            root
        ));
        assert!(!is_relevant(
            &event(EventKind::Create(CreateKind::File), "/w/node_modules/x/a.js"),
            root
        ));
        assert!(!is_relevant(&event(EventKind::Create(CreateKind::File), "/w/.quarry/s.json"), root));
    }

    fn registry() -> (tempfile::TempDir, WorkspaceInfo, WatcherRegistry<MockProvider>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\n").unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        let info = detect_workspace(dir.path(), &DetectorConfig::default()).unwrap();
        let coordinator = IndexCoordinator::new(
            Arc::new(MockProvider::new(8)),
            Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>,
            CoordinatorConfig::default(),
        );
        (dir, info, WatcherRegistry::new(coordinator, Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn start_is_idempotent_per_root() {
        let (_dir, info, registry) = registry();
        let first = registry.start(&info).unwrap();
        let second = registry.start(&info).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_watching(info.root()));

        assert!(registry.stop(info.root()));
        assert!(first.is_stopped());
        assert!(!registry.stop(info.root()));
        registry.stop_all().await;
    }

    #[tokio::test]
    async fn start_on_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::spawn(&tracker, DEFAULT_QUIET_PERIOD, cancel.clone(), || {});
        let result = WorkspaceWatcher::start(
            &dir.path().join("missing"),
            debouncer,
            &tracker,
            cancel.clone(),
        );
        assert!(result.is_err());
        cancel.cancel();
    }

    /// Poll `check` for up to five seconds.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }

    fn start_counted(
        root: &Path,
        quiet: Duration,
    ) -> (Arc<AtomicUsize>, WorkspaceWatcher, TaskTracker, CancellationToken) {
        let (count, on_quiet) = counter();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let debouncer = Debouncer::spawn(&tracker, quiet, cancel.clone(), on_quiet);
        let watcher = WorkspaceWatcher::start(root, debouncer, &tracker, cancel.clone()).unwrap();
        (count, watcher, tracker, cancel)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_event_fires_after_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let (count, watcher, tracker, cancel) = start_counted(dir.path(), Duration::from_millis(100));

        std::fs::write(dir.path().join("src/a.py"), "A = 1\n").unwrap();
        std::fs::write(dir.path().join("src/b.py"), "B = 2\n").unwrap();
        assert!(eventually(|| count.load(Ordering::SeqCst) >= 1).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        watcher.stop();
        tracker.close();
        tracker.wait().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn new_subdirectory_is_watched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        let (count, watcher, tracker, _cancel) = start_counted(dir.path(), Duration::from_millis(100));

        std::fs::create_dir_all(dir.path().join("pkg/new")).unwrap();
        assert!(eventually(|| count.load(Ordering::SeqCst) >= 1).await);
        // let the directory task register the new watch
        tokio::time::sleep(Duration::from_millis(300)).await;
        let settled = count.load(Ordering::SeqCst);

        std::fs::write(dir.path().join("pkg/new/mod.py"), "def f():\n    return 1\n").unwrap();
        assert!(eventually(|| count.load(Ordering::SeqCst) > settled).await);

        watcher.stop();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_under_ignored_dirs_do_not_fire() {
        let dir = tempfile::tempdir().unwrap();
        for ignored in ["node_modules/lib", ".cache", "build"] {
            std::fs::create_dir_all(dir.path().join(ignored)).unwrap();
        }
        let (count, watcher, tracker, _cancel) = start_counted(dir.path(), Duration::from_millis(50));

        std::fs::write(dir.path().join("node_modules/lib/index.js"), "x\n").unwrap();
        std::fs::write(dir.path().join(".cache/entry.py"), "x\n").unwrap();
        std::fs::write(dir.path().join("build/out.rs"), "x\n").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        watcher.stop();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_in_new_directory_gets_indexed() {
        let (dir, info, registry) = registry();
        registry.start(&info).unwrap();

        std::fs::create_dir_all(dir.path().join("pkg/new")).unwrap();
        std::fs::write(
            dir.path().join("pkg/new/mod.py"),
            "def greet(name):\n    return f\"hi {name}\"\n",
        )
        .unwrap();

        let state = state_path(info.root(), ".quarry", Lang::Python);
        assert!(
            eventually(|| std::fs::read_to_string(&state).is_ok_and(|s| s.contains("mod.py"))).await
        );
        let handle = registry
            .coordinator
            .get_storage(&info, Lang::Python)
            .await
            .unwrap();
        assert!(handle.point_count().await.unwrap() >= 1);

        registry.stop_all().await;
        registry.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn stop_all_empties_registry() {
        let (_dir, info, registry) = registry();
        let watcher = registry.start(&info).unwrap();
        registry.stop_all().await;
        assert!(registry.is_empty());
        assert!(watcher.is_stopped());
    }
}
