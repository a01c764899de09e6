mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use quarry_index::hybrid::{self, HybridHit};
use quarry_index::{
    IndexCoordinator, Lang, Readiness, StorageHandle, WatcherRegistry, WorkspaceDetector,
    WorkspaceInfo,
};
use quarry_llm::ollama::OllamaProvider;
use quarry_llm::openai::OpenAiProvider;
use quarry_llm::{AnyProvider, EmbeddingProvider};
use quarry_store::{InMemoryVectorStore, QdrantStore, VectorStore};

use crate::config::{Config, ProviderKind, StoreBackend};

#[derive(Debug, Parser)]
#[command(name = "quarry", version, about = "Workspace-aware semantic code index")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the workspace a path belongs to
    Detect { path: PathBuf },
    /// Index every language of a workspace and wait for completion
    Index { path: PathBuf },
    /// Hybrid semantic and lexical search
    Search {
        query: String,
        /// Any path inside the workspace; defaults to the current directory
        #[arg(long)]
        path: Option<PathBuf>,
        /// Search one language instead of every indexed one
        #[arg(long)]
        language: Option<Lang>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show index readiness per language
    Status { path: PathBuf },
    /// Keep a workspace indexed until interrupted
    Watch { path: PathBuf },
}

struct App {
    config: Config,
    detector: WorkspaceDetector,
    coordinator: IndexCoordinator<AnyProvider>,
}

impl App {
    fn new(config: Config) -> anyhow::Result<Self> {
        let provider = create_provider(&config)?;
        let store = create_store(&config)?;
        tracing::debug!(
            provider = provider.name(),
            backend = ?config.store.backend,
            "backends ready"
        );
        Ok(Self {
            detector: WorkspaceDetector::new(config.detector_config()),
            coordinator: IndexCoordinator::new(Arc::new(provider), store, config.coordinator_config()),
            config,
        })
    }

    fn detect(&self, path: &Path) -> anyhow::Result<WorkspaceInfo> {
        self.detector
            .detect(path)
            .with_context(|| format!("cannot resolve workspace for {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    match cli.command {
        Command::Detect { path } => {
            let detector = WorkspaceDetector::new(config.detector_config());
            let info = detector
                .detect(&path)
                .with_context(|| format!("cannot resolve workspace for {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Index { path } => {
            let app = App::new(config)?;
            let info = app.detect(&path)?;
            let result = tokio::select! {
                res = index_workspace(&app, &info) => res,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    Ok(())
                }
            };
            if result.is_ok() && app.config.index.watch {
                watch_workspace(&app, &info).await?;
            }
            app.coordinator.shutdown().await;
            result
        }
        Command::Search {
            query,
            path,
            language,
            limit,
        } => {
            let app = App::new(config)?;
            let path = match path {
                Some(path) => path,
                None => std::env::current_dir().context("cannot read current directory")?,
            };
            let info = app.detect(&path)?;
            let limit = limit.unwrap_or(app.config.index.search_limit);
            let hits = search(&app, &info, &query, language, limit).await;
            app.coordinator.shutdown().await;
            print_hits(&hits?);
            Ok(())
        }
        Command::Status { path } => {
            let app = App::new(config)?;
            let info = app.detect(&path)?;
            print_status(&app, &info).await
        }
        Command::Watch { path } => {
            let app = App::new(config)?;
            let info = app.detect(&path)?;
            app.coordinator.ensure_workspace_indexed(&info).await?;
            let result = watch_workspace(&app, &info).await;
            app.coordinator.shutdown().await;
            result
        }
    }
}

async fn index_workspace(app: &App, info: &WorkspaceInfo) -> anyhow::Result<()> {
    let languages = app.coordinator.workspace_languages(info).await?;
    if languages.is_empty() {
        tracing::warn!(root = %info.root().display(), "no supported source files found");
    }
    for lang in languages {
        let report = app
            .coordinator
            .index_now(info, lang)
            .await
            .with_context(|| format!("indexing {lang} failed"))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "workspace": info.id(),
                "language": lang,
                "report": report,
            }))?
        );
    }
    Ok(())
}

async fn watch_workspace(app: &App, info: &WorkspaceInfo) -> anyhow::Result<()> {
    let registry = WatcherRegistry::new(app.coordinator.clone(), app.config.debounce());
    registry.start(info)?;
    tracing::info!(root = %info.root().display(), "watching for changes, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e:#}");
    }
    registry.stop_all().await;
    Ok(())
}

async fn ready_handle(app: &App, info: &WorkspaceInfo, lang: Lang) -> anyhow::Result<StorageHandle> {
    match app.coordinator.readiness(info, lang).await? {
        Readiness::Ready(handle) => Ok(handle),
        Readiness::NotIndexed => bail!("{lang} is not indexed yet for {}; run `quarry index`", info.root().display()),
        Readiness::Indexing => bail!("{lang} indexing is in progress; retry shortly"),
    }
}

async fn search(
    app: &App,
    info: &WorkspaceInfo,
    query: &str,
    language: Option<Lang>,
    limit: usize,
) -> anyhow::Result<Vec<HybridHit>> {
    let provider = app.coordinator.provider().as_ref();
    if let Some(lang) = language {
        let handle = ready_handle(app, info, lang).await?;
        return Ok(hybrid::hybrid_search(provider, &handle, query, limit).await?);
    }

    let mut handles = Vec::new();
    for lang in app.coordinator.workspace_languages(info).await? {
        match app.coordinator.readiness(info, lang).await? {
            Readiness::Ready(handle) => handles.push(handle),
            Readiness::NotIndexed | Readiness::Indexing => {
                tracing::debug!(language = %lang, "skipping unindexed language");
            }
        }
    }
    Ok(hybrid::search_collections(provider, &handles, query, limit).await?)
}

fn print_hits(hits: &[HybridHit]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }
    for hit in hits {
        let Some(chunk) = hit.chunk() else {
            println!("{:.3}  {}", hit.score(), hit.id);
            continue;
        };
        println!(
            "{:.3}  {}:{}-{}  {} {}",
            hit.score(),
            chunk.file_path,
            chunk.start_line,
            chunk.end_line,
            chunk.kind,
            chunk.name
        );
        if !chunk.signature.is_empty() {
            println!("       {}", chunk.signature);
        }
    }
}

async fn print_status(app: &App, info: &WorkspaceInfo) -> anyhow::Result<()> {
    println!("{} ({}) {}", info.root().display(), info.project_type(), info.id());
    for lang in app.coordinator.workspace_languages(info).await? {
        let status = match app.coordinator.readiness(info, lang).await? {
            Readiness::Ready(handle) => format!("ready, {} chunks", handle.point_count().await?),
            Readiness::NotIndexed => "not indexed".to_string(),
            Readiness::Indexing => "indexing".to_string(),
        };
        println!("  {:<12} {status}", lang.id());
    }
    Ok(())
}

fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let base_url = config.llm.base_url();
    let model = config.llm.embedding_model.clone();
    match config.llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(base_url, model))),
        ProviderKind::OpenAi => {
            let api_key = config
                .llm
                .openai_api_key
                .clone()
                .context("QUARRY_OPENAI_API_KEY is required for the openai provider")?;
            let provider = OpenAiProvider::new(api_key, base_url.to_string(), model)
                .context("failed to build OpenAI client")?
                .with_max_retries(config.llm.max_retries);
            Ok(AnyProvider::OpenAi(provider))
        }
    }
}

fn create_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.store.backend {
        StoreBackend::Qdrant => {
            let store = QdrantStore::new(&config.store.qdrant_url)
                .with_context(|| format!("failed to connect to qdrant at {}", config.store.qdrant_url))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(InMemoryVectorStore::new())),
    }
}

fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("QUARRY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
