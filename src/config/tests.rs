use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 11] = [
    "QUARRY_LLM_PROVIDER",
    "QUARRY_LLM_BASE_URL",
    "QUARRY_LLM_EMBEDDING_MODEL",
    "QUARRY_OPENAI_API_KEY",
    "QUARRY_QDRANT_URL",
    "QUARRY_COLLECTION_PREFIX",
    "QUARRY_AUTO_INDEX",
    "QUARRY_MAX_WORKSPACES",
    "QUARRY_WATCH",
    "QUARRY_DEBOUNCE_MS",
    "QUARRY_CACHE_TTL_SECS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.base_url(), DEFAULT_OLLAMA_URL);
    assert_eq!(config.llm.max_retries, 3);
    assert_eq!(config.store.backend, StoreBackend::Qdrant);
    assert_eq!(config.store.qdrant_url, "http://localhost:6334");
    assert_eq!(config.store.collection_prefix, "quarry");
    assert_eq!(config.workspace.markers[0], "go.mod");
    assert_eq!(config.workspace.markers.last().unwrap(), ".git");
    assert!(config.index.auto_index);
    assert_eq!(config.index.max_workspaces, 10);
    assert_eq!(config.index.state_dir, ".quarry");
    assert_eq!(config.index.debounce_ms, 5000);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_loads_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/quarry.toml")).unwrap();
    assert_eq!(config.index.max_workspaces, 10);
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[llm]
provider = "openai"
embedding_model = "text-embedding-3-small"

[store]
backend = "memory"
collection_prefix = "proj"

[workspace]
markers = ["Cargo.toml", ".git"]
exclude = ["/vendor/"]

[index]
max_workspaces = 3
debounce_ms = 250
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.llm.base_url(), DEFAULT_OPENAI_URL);
    assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.workspace.markers, vec!["Cargo.toml", ".git"]);
    assert_eq!(config.index.max_workspaces, 3);
    assert!(config.index.auto_index);

    let detector = config.detector_config();
    assert_eq!(detector.collection_prefix, "proj");
    assert_eq!(detector.exclude, vec!["/vendor/"]);
    assert_eq!(config.debounce().as_millis(), 250);
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[index\nmax_workspaces = ").unwrap();
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.toml");
    std::fs::write(&path, "[index]\nmax_workspaces = 3\n").unwrap();

    clear_env();
    unsafe {
        std::env::set_var("QUARRY_LLM_PROVIDER", "openai");
        std::env::set_var("QUARRY_LLM_BASE_URL", "http://proxy:8080/v1");
        std::env::set_var("QUARRY_OPENAI_API_KEY", "sk-test");
        std::env::set_var("QUARRY_MAX_WORKSPACES", "7");
        std::env::set_var("QUARRY_AUTO_INDEX", "false");
        std::env::set_var("QUARRY_WATCH", "true");
        std::env::set_var("QUARRY_DEBOUNCE_MS", "1000");
        std::env::set_var("QUARRY_CACHE_TTL_SECS", "5");
        std::env::set_var("QUARRY_COLLECTION_PREFIX", "envpfx");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.llm.base_url(), "http://proxy:8080/v1");
    assert_eq!(config.llm.openai_api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.index.max_workspaces, 7);
    assert!(!config.index.auto_index);
    assert!(config.index.watch);
    assert_eq!(config.index.debounce_ms, 1000);
    assert_eq!(config.workspace.cache_ttl_secs, 5);
    assert_eq!(config.store.collection_prefix, "envpfx");
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("QUARRY_LLM_PROVIDER", "claude");
        std::env::set_var("QUARRY_MAX_WORKSPACES", "many");
    }
    let config = Config::load(Path::new("/nonexistent/quarry.toml")).unwrap();
    clear_env();
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.index.max_workspaces, 10);
}

#[test]
fn validate_rejects_unusable_settings() {
    let mut config = Config::default();
    config.index.max_workspaces = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.index.debounce_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.workspace.markers.clear();
    assert!(config.validate().is_err());
}

#[test]
fn api_key_is_never_serialized() {
    let mut config = Config::default();
    config.llm.openai_api_key = Some("sk-secret".into());
    let text = toml::to_string(&config).unwrap();
    assert!(!text.contains("sk-secret"));
}

#[test]
#[serial]
fn reject_prefixes_reach_detector() {
    clear_env();
    let defaults = Config::default().detector_config();
    assert_eq!(defaults.reject_prefixes, vec![std::env::temp_dir()]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefixes.toml");
    std::fs::write(
        &path,
        "[workspace]\nreject_prefixes = [\"/scratch\", \"/var/tmp\"]\n",
    )
    .unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(
        config.detector_config().reject_prefixes,
        vec![
            std::path::PathBuf::from("/scratch"),
            std::path::PathBuf::from("/var/tmp")
        ]
    );
    assert_eq!(config.workspace.cache_ttl_secs, 30);
}
