//! Application bootstrap: config resolution, embedder/backend/source construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use prior_embed::AnyEmbedder;
use prior_embed::ollama::OllamaEmbedder;
use prior_embed::openai::OpenAiEmbedder;
use prior_index::backend::pinecone::PineconeOptions;
use prior_index::backend::{PineconeBackend, QdrantBackend, TableBackend, VectorIndexBackend};
use prior_index::{BackendKind, IndexSynchronizer, SimilaritySearcher};

use crate::config::{Config, EmbeddingProvider};
use crate::github::GitHubIssueSource;

pub type Synchronizer = IndexSynchronizer<AnyEmbedder, GitHubIssueSource>;
pub type Searcher = SimilaritySearcher<AnyEmbedder, GitHubIssueSource>;

/// Priority: CLI `--config` > `PRIOR_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("PRIOR_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// # Errors
///
/// Returns an error if the openai provider is selected without an API key.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let emb = &config.embedding;
    match emb.provider {
        EmbeddingProvider::OpenAi => {
            let key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("PRIOR_OPENAI_API_KEY not set")?;
            Ok(AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                key.expose().to_owned(),
                emb.base_url.clone(),
                emb.model.clone(),
                emb.dimension,
                emb.max_input_tokens,
            )))
        }
        EmbeddingProvider::Ollama => Ok(AnyEmbedder::Ollama(OllamaEmbedder::new(
            &emb.base_url,
            emb.model.clone(),
            emb.dimension,
            emb.max_input_tokens,
        ))),
    }
}

/// Open the configured vector store.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or required settings are missing.
pub async fn create_backend(config: &Config) -> anyhow::Result<Arc<dyn VectorIndexBackend>> {
    let dimension =
        u64::try_from(config.embedding.dimension).context("embedding dimension out of range")?;
    let backend = &config.backend;
    let store: Arc<dyn VectorIndexBackend> = match backend.kind {
        BackendKind::Table => Arc::new(
            TableBackend::open(&backend.table.path, &backend.table.table, dimension)
                .await
                .with_context(|| format!("failed to open table store {}", backend.table.path))?,
        ),
        BackendKind::Qdrant => {
            let api_key = config
                .secrets
                .qdrant_api_key
                .as_ref()
                .map(|s| s.expose().to_owned());
            Arc::new(
                QdrantBackend::new(
                    &backend.qdrant.url,
                    api_key,
                    &backend.qdrant.collection,
                    dimension,
                )
                .context("failed to create qdrant client")?,
            )
        }
        BackendKind::Pinecone => {
            let api_key = config
                .secrets
                .pinecone_api_key
                .as_ref()
                .context("PRIOR_PINECONE_API_KEY not set")?;
            let options = PineconeOptions {
                host: backend.pinecone.host.clone(),
                namespace: backend.pinecone.namespace.clone(),
                batch_size: backend.pinecone.batch_size,
                poll_attempts: backend.pinecone.poll_attempts,
                poll_interval: Duration::from_millis(backend.pinecone.poll_interval_ms),
            };
            Arc::new(
                PineconeBackend::new(api_key.expose().to_owned(), options, dimension)
                    .context("invalid pinecone settings")?,
            )
        }
    };
    tracing::debug!(backend = store.name(), dimension, "vector store ready");
    Ok(store)
}

#[must_use]
pub fn create_source(config: &Config) -> GitHubIssueSource {
    GitHubIssueSource::new(&config.github, config.secrets.github_token.clone())
}

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

impl AppBuilder {
    /// Resolve the config path, load it, and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a setting is invalid.
    pub fn load(cli_config: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = resolve_config_path(cli_config);
        let config = Config::load(&config_path)?;
        config.validate()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    #[must_use]
    pub fn from_config(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// # Errors
    ///
    /// Returns an error if the embedder or vector store cannot be constructed.
    pub async fn build(&self) -> anyhow::Result<App> {
        let embedder = create_embedder(&self.config)?;
        let backend = create_backend(&self.config).await?;
        let source = create_source(&self.config);
        tracing::info!(
            provider = %self.config.embedding.provider,
            model = %self.config.embedding.model,
            backend = backend.name(),
            "prior initialized"
        );
        Ok(App::new(backend, embedder, source, &self.config))
    }
}

/// The synchronizer and searcher sharing one backend, embedder, and source.
pub struct App {
    pub synchronizer: Synchronizer,
    pub searcher: Searcher,
}

impl App {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VectorIndexBackend>,
        embedder: AnyEmbedder,
        source: GitHubIssueSource,
        config: &Config,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let source = Arc::new(source);
        Self {
            synchronizer: IndexSynchronizer::new(
                Arc::clone(&backend),
                Arc::clone(&embedder),
                Arc::clone(&source),
                config.sync_config(),
            ),
            searcher: SimilaritySearcher::new(backend, embedder, source, config.search_config()),
        }
    }
}

#[cfg(test)]
mod tests {
    use prior_embed::Embedder;
    use serial_test::serial;

    use super::*;
    use crate::config::Secret;

    fn local_config() -> Config {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProvider::Ollama;
        config.embedding.base_url = "http://localhost:11434".into();
        config.embedding.model = "nomic-embed-text".into();
        config.embedding.dimension = 768;
        config.backend.table.path = ":memory:".into();
        config
    }

    #[test]
    #[serial]
    fn config_path_prefers_cli() {
        unsafe { std::env::set_var("PRIOR_CONFIG", "/etc/prior.toml") };
        let path = resolve_config_path(Some(Path::new("/tmp/cli.toml")));
        unsafe { std::env::remove_var("PRIOR_CONFIG") };
        assert_eq!(path, PathBuf::from("/tmp/cli.toml"));
    }

    #[test]
    #[serial]
    fn config_path_falls_back_to_env_then_default() {
        unsafe { std::env::set_var("PRIOR_CONFIG", "/etc/prior.toml") };
        let from_env = resolve_config_path(None);
        unsafe { std::env::remove_var("PRIOR_CONFIG") };
        assert_eq!(from_env, PathBuf::from("/etc/prior.toml"));
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("config/default.toml")
        );
    }

    #[test]
    fn create_embedder_ollama() {
        let embedder = create_embedder(&local_config()).unwrap();
        assert!(matches!(embedder, AnyEmbedder::Ollama(_)));
        assert_eq!(embedder.dimension(), 768);
        assert_eq!(embedder.model(), "nomic-embed-text");
    }

    #[test]
    fn create_embedder_openai_requires_key() {
        let mut config = local_config();
        config.embedding.provider = EmbeddingProvider::OpenAi;
        assert!(create_embedder(&config).is_err());

        config.secrets.openai_api_key = Some(Secret::new("sk-test"));
        let embedder = create_embedder(&config).unwrap();
        assert!(matches!(embedder, AnyEmbedder::OpenAi(_)));
    }

    #[tokio::test]
    async fn create_backend_table_in_memory() {
        let backend = create_backend(&local_config()).await.unwrap();
        assert_eq!(backend.name(), "table");
        assert!(!backend.exists("acme/widgets").await.unwrap());
    }

    #[tokio::test]
    async fn create_backend_pinecone_requires_key() {
        let mut config = local_config();
        config.backend.kind = BackendKind::Pinecone;
        config.backend.pinecone.host = "https://idx.svc.pinecone.io".into();
        let err = create_backend(&config).await.err().unwrap();
        assert!(err.to_string().contains("PRIOR_PINECONE_API_KEY"));

        config.secrets.pinecone_api_key = Some(Secret::new("pk"));
        let backend = create_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "pinecone");
    }

    #[tokio::test]
    async fn create_backend_rejects_bad_table_name() {
        let mut config = local_config();
        config.backend.table.table = "issues; DROP".into();
        assert!(create_backend(&config).await.is_err());
    }

    #[tokio::test]
    async fn builder_wires_sync_and_search_config() {
        let mut config = local_config();
        config.sync.max_issues = 12;
        config.search.limit = 3;
        let app = AppBuilder::from_config(config, PathBuf::from("unused.toml"))
            .build()
            .await
            .unwrap();
        assert_eq!(app.synchronizer.config().max_issues, 12);
    }
}
