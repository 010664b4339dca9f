use std::fmt;

use prior_index::BackendKind;
use prior_index::sync::SyncPolicy;
use serde::{Deserialize, Serialize};

/// A credential that never shows up in logs or `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Credentials, read from the environment only.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
    pub pinecone_api_key: Option<Secret>,
    pub qdrant_api_key: Option<Secret>,
    pub github_token: Option<Secret>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    OpenAi,
    Ollama,
}

impl EmbeddingProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_dimension() -> usize {
    1536
}

fn default_max_input_tokens() -> usize {
    8191
}

fn default_embed_batch_size() -> usize {
    prior_index::embedding::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            dimension: default_dimension(),
            max_input_tokens: default_max_input_tokens(),
            batch_size: default_embed_batch_size(),
        }
    }
}

fn default_max_issues() -> usize {
    1000
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SyncSection {
    #[serde(default = "default_max_issues")]
    pub max_issues: usize,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub policy: SyncPolicy,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            max_issues: default_max_issues(),
            force_refresh: false,
            policy: SyncPolicy::default(),
        }
    }
}

fn default_search_limit() -> usize {
    prior_index::search::DEFAULT_LIMIT
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchSection {
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}

fn default_per_page() -> u32 {
    100
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            per_page: default_per_page(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub pinecone: PineconeConfig,
}

fn default_table_path() -> String {
    "./data/lancedb".into()
}

fn default_table_name() -> String {
    "issues".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TableConfig {
    #[serde(default = "default_table_path")]
    pub path: String,
    #[serde(default = "default_table_name")]
    pub table: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            path: default_table_path(),
            table: default_table_name(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_qdrant_collection() -> String {
    "prior_issues".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_qdrant_collection")]
    pub collection: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_qdrant_collection(),
        }
    }
}

fn default_pinecone_batch_size() -> usize {
    100
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PineconeConfig {
    /// Data-plane host of a provisioned index.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_pinecone_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            namespace: String::new(),
            batch_size: default_pinecone_batch_size(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
