use std::path::Path;
use std::sync::Arc;

use quarry_index::hybrid::hybrid_search;
use quarry_index::{
    CoordinatorConfig, DetectorConfig, IndexCoordinator, IndexError, Lang, Readiness,
    WorkspaceDetector,
};
use quarry_llm::mock::MockProvider;
use quarry_store::{InMemoryVectorStore, VectorStore};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn python_project(root: &Path) {
    write(root, "pyproject.toml", "[project]\nname = \"auth\"\n");
    write(root, "auth/__init__.py", "");
    write(
        root,
        "auth/tokens.py",
        r#"import hmac


class TokenVerifier:
    """Checks signed session tokens."""

    def verify_token(self, token):
        """Return True when the token signature matches."""
        return hmac.compare_digest(token, self.expected)

    def refresh(self):
        self.expected = load_secret()


def load_secret():
    return "secret"
"#,
    );
    write(root, "README.md", "# Auth\nToken verification helpers.\n\n## Setup\nInstall it.\n");
}

fn coordinator(store: &Arc<InMemoryVectorStore>) -> IndexCoordinator<MockProvider> {
    IndexCoordinator::new(
        Arc::new(MockProvider::new(64)),
        Arc::clone(store) as Arc<dyn VectorStore>,
        CoordinatorConfig {
            auto_index: false,
            ..CoordinatorConfig::default()
        },
    )
}

#[tokio::test]
async fn detect_index_search_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    python_project(dir.path());

    let detector = WorkspaceDetector::new(DetectorConfig::default());
    let info = detector.detect(&dir.path().join("auth/tokens.py")).unwrap();
    assert_eq!(info.project_type(), "python");
    assert_eq!(info.languages(), &[Lang::Python]);

    let store = Arc::new(InMemoryVectorStore::new());
    let coordinator = coordinator(&store);
    let report = coordinator.index_now(&info, Lang::Python).await.unwrap();
    assert_eq!(report.files_scanned, 3);
    assert!(report.errors.is_empty());
    assert!(report.chunks_indexed >= 5);

    let handle = match coordinator.readiness(&info, Lang::Python).await.unwrap() {
        Readiness::Ready(handle) => handle,
        other => panic!("expected ready collection, got {other:?}"),
    };
    let hits = hybrid_search(
        coordinator.provider().as_ref(),
        &handle,
        "verify_token signature",
        3,
    )
    .await
    .unwrap();
    let top = hits[0].chunk().unwrap();
    assert_eq!(top.name, "verify_token");
    assert_eq!(top.kind, "method");
    assert_eq!(top.parent.as_deref(), Some("TokenVerifier"));
    assert!(hits[0].combined_score.is_some());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn removed_function_disappears_from_results() {
    let dir = tempfile::tempdir().unwrap();
    python_project(dir.path());
    let info = WorkspaceDetector::new(DetectorConfig::default())
        .detect(dir.path())
        .unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let coordinator = coordinator(&store);
    coordinator.index_now(&info, Lang::Python).await.unwrap();

    write(
        dir.path(),
        "auth/tokens.py",
        "def load_secret():\n    return \"rotated secret value\"\n",
    );
    let report = coordinator.index_now(&info, Lang::Python).await.unwrap();
    assert_eq!(report.files_indexed, 1);

    let hits = coordinator.search_all("verify_token", 10).await.unwrap();
    assert!(
        hits.iter()
            .filter_map(|h| h.chunk())
            .all(|c| c.name != "verify_token")
    );
}

#[tokio::test]
async fn aggregated_search_spans_workspaces() {
    let first = tempfile::tempdir().unwrap();
    python_project(first.path());
    let second = tempfile::tempdir().unwrap();
    write(second.path(), "go.mod", "module demo\n");
    write(
        second.path(),
        "token.go",
        "package demo\n\n// VerifyToken checks a token.\nfunc VerifyToken(token string) bool {\n\treturn token != \"\"\n}\n",
    );

    let detector = WorkspaceDetector::new(DetectorConfig::default());
    let py = detector.detect(first.path()).unwrap();
    let go = detector.detect(second.path()).unwrap();
    assert_ne!(py.id(), go.id());

    let store = Arc::new(InMemoryVectorStore::new());
    let coordinator = coordinator(&store);
    coordinator.index_now(&py, Lang::Python).await.unwrap();
    coordinator.index_now(&go, Lang::Go).await.unwrap();

    let hits = coordinator.search_all("token", 20).await.unwrap();
    let collections: std::collections::HashSet<&str> =
        hits.iter().map(|h| h.collection.as_str()).collect();
    assert!(collections.contains(py.collection_name(Lang::Python).as_str()));
    assert!(collections.contains(go.collection_name(Lang::Go).as_str()));
}

#[tokio::test]
async fn auto_index_on_first_storage_request() {
    let dir = tempfile::tempdir().unwrap();
    python_project(dir.path());
    let info = WorkspaceDetector::new(DetectorConfig::default())
        .detect(dir.path())
        .unwrap();

    let store = Arc::new(InMemoryVectorStore::new());
    let coordinator = IndexCoordinator::new(
        Arc::new(MockProvider::new(32)),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        CoordinatorConfig::default(),
    );
    let handle = coordinator.get_storage(&info, Lang::Python).await.unwrap();
    coordinator.wait_idle().await;
    assert!(handle.point_count().await.unwrap() >= 5);
    assert!(
        dir.path()
            .join(".quarry")
            .join("state-python.json")
            .exists()
    );
}

#[test]
fn excluded_and_unanchored_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    python_project(dir.path());
    write(dir.path(), "third_party/lib/x.py", "X = 1\n");

    let detector = WorkspaceDetector::new(DetectorConfig {
        exclude: vec!["third_party".into()],
        ..DetectorConfig::default()
    });
    let err = detector
        .detect(&dir.path().join("third_party/lib/x.py"))
        .unwrap_err();
    assert!(matches!(err, IndexError::ExcludedPath { .. }));

    let bare = tempfile::tempdir().unwrap();
    let err = WorkspaceDetector::new(DetectorConfig::default())
        .detect(bare.path())
        .unwrap_err();
    assert!(matches!(err, IndexError::WorkspaceNotFound { .. }));
}
