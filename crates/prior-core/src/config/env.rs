use super::{Config, Secret};

fn parse_enum<T: serde::de::DeserializeOwned>(name: &str, value: String) -> Option<T> {
    match serde_json::from_value(serde_json::Value::String(value.clone())) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {name} value: {value}");
            None
        }
    }
}

fn secret_var(name: &str) -> Option<Secret> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(Secret::new)
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_PROVIDER")
            && let Some(provider) = parse_enum("PRIOR_EMBEDDING_PROVIDER", v)
        {
            self.embedding.provider = provider;
        }
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_DIMENSION")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.dimension = n;
        }
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_MAX_INPUT_TOKENS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.max_input_tokens = n;
        }
        if let Ok(v) = std::env::var("PRIOR_EMBEDDING_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.batch_size = n;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("PRIOR_BACKEND")
            && let Some(kind) = parse_enum("PRIOR_BACKEND", v)
        {
            self.backend.kind = kind;
        }
        if let Ok(v) = std::env::var("PRIOR_TABLE_PATH") {
            self.backend.table.path = v;
        }
        if let Ok(v) = std::env::var("PRIOR_QDRANT_URL") {
            self.backend.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("PRIOR_QDRANT_COLLECTION") {
            self.backend.qdrant.collection = v;
        }
        if let Ok(v) = std::env::var("PRIOR_PINECONE_HOST") {
            self.backend.pinecone.host = v;
        }
        if let Ok(v) = std::env::var("PRIOR_PINECONE_NAMESPACE") {
            self.backend.pinecone.namespace = v;
        }
        if let Ok(v) = std::env::var("PRIOR_SYNC_MAX_ISSUES")
            && let Ok(n) = v.parse::<usize>()
        {
            self.sync.max_issues = n;
        }
        if let Ok(v) = std::env::var("PRIOR_SYNC_FORCE_REFRESH")
            && let Ok(force) = v.parse::<bool>()
        {
            self.sync.force_refresh = force;
        }
        if let Ok(v) = std::env::var("PRIOR_SYNC_POLICY")
            && let Some(policy) = parse_enum("PRIOR_SYNC_POLICY", v)
        {
            self.sync.policy = policy;
        }
        if let Ok(v) = std::env::var("PRIOR_SEARCH_LIMIT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.search.limit = n;
        }
        if let Ok(v) = std::env::var("PRIOR_GITHUB_API_URL") {
            self.github.api_url = v;
        }
    }

    /// Read credentials from the environment. `GITHUB_TOKEN` is used when
    /// `PRIOR_GITHUB_TOKEN` is unset.
    pub(crate) fn resolve_secrets(&mut self) {
        self.secrets.openai_api_key = secret_var("PRIOR_OPENAI_API_KEY");
        self.secrets.pinecone_api_key = secret_var("PRIOR_PINECONE_API_KEY");
        self.secrets.qdrant_api_key = secret_var("PRIOR_QDRANT_API_KEY");
        self.secrets.github_token =
            secret_var("PRIOR_GITHUB_TOKEN").or_else(|| secret_var("GITHUB_TOKEN"));
    }
}
