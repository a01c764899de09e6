use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid QUARRY_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v);
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_COLLECTION_PREFIX") {
            self.store.collection_prefix = v;
        }
        if let Ok(v) = std::env::var("QUARRY_AUTO_INDEX")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.index.auto_index = enabled;
        }
        if let Ok(v) = std::env::var("QUARRY_MAX_WORKSPACES")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.max_workspaces = n;
        }
        if let Ok(v) = std::env::var("QUARRY_WATCH")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.index.watch = enabled;
        }
        if let Ok(v) = std::env::var("QUARRY_DEBOUNCE_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.index.debounce_ms = ms;
        }
        if let Ok(v) = std::env::var("QUARRY_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.workspace.cache_ttl_secs = secs;
        }
    }
}
