use std::path::PathBuf;
use std::time::Duration;

use quarry_index::workspace::{DEFAULT_COLLECTION_PREFIX, DEFAULT_MARKERS};
use quarry_index::{CoordinatorConfig, DetectorConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenAi,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    /// Defaults to the provider's public endpoint when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub embedding_model: String,
    pub max_retries: u32,
    /// Only ever read from `QUARRY_OPENAI_API_KEY`.
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            embedding_model: "qwen3-embedding".into(),
            max_retries: 3,
            openai_api_key: None,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, ProviderKind::Ollama) => DEFAULT_OLLAMA_URL,
            (None, ProviderKind::OpenAi) => DEFAULT_OPENAI_URL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Qdrant,
    /// Process-local; contents are lost on exit.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub qdrant_url: String,
    pub collection_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            qdrant_url: "http://localhost:6334".into(),
            collection_prefix: DEFAULT_COLLECTION_PREFIX.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Marker names in priority order.
    pub markers: Vec<String>,
    pub exclude: Vec<String>,
    /// Fallback roots under these directories are rejected. Defaults to the system temp dir.
    pub reject_prefixes: Vec<PathBuf>,
    pub cache_ttl_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(ToString::to_string).collect(),
            exclude: Vec::new(),
            reject_prefixes: vec![std::env::temp_dir()],
            cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub auto_index: bool,
    pub max_workspaces: usize,
    pub state_dir: String,
    pub watch: bool,
    pub debounce_ms: u64,
    pub search_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            auto_index: true,
            max_workspaces: 10,
            state_dir: ".quarry".into(),
            watch: false,
            debounce_ms: 5000,
            search_limit: 10,
        }
    }
}

impl Config {
    #[must_use]
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            markers: self.workspace.markers.clone(),
            exclude: self.workspace.exclude.clone(),
            reject_prefixes: self.workspace.reject_prefixes.clone(),
            collection_prefix: self.store.collection_prefix.clone(),
            cache_ttl: Duration::from_secs(self.workspace.cache_ttl_secs),
            ..DetectorConfig::default()
        }
    }

    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            auto_index: self.index.auto_index,
            max_workspaces: self.index.max_workspaces,
            state_dir: self.index.state_dir.clone(),
        }
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.index.debounce_ms)
    }
}
