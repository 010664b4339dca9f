mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::Context;
use prior_index::{IndexError, SearchConfig, SyncConfig};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist. Credentials are
    /// only ever read from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.resolve_secrets();
        Ok(config)
    }

    /// Reject settings that would fail later in a less obvious place.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), IndexError> {
        let fail = |msg: String| Err(IndexError::Config(msg));
        if self.embedding.dimension == 0 {
            return fail("embedding.dimension must be positive".into());
        }
        if self.embedding.max_input_tokens == 0 {
            return fail("embedding.max_input_tokens must be positive".into());
        }
        if self.embedding.batch_size == 0 {
            return fail("embedding.batch_size must be positive".into());
        }
        if self.embedding.model.trim().is_empty() {
            return fail("embedding.model must not be empty".into());
        }
        if self.sync.max_issues == 0 {
            return fail("sync.max_issues must be positive".into());
        }
        if self.search.limit == 0 {
            return fail("search.limit must be positive".into());
        }
        if self.github.per_page == 0 || self.github.per_page > 100 {
            return fail(format!(
                "github.per_page must be between 1 and 100, got {}",
                self.github.per_page
            ));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi
            && self.secrets.openai_api_key.is_none()
        {
            return fail("PRIOR_OPENAI_API_KEY is required for the openai provider".into());
        }
        match self.backend.kind {
            prior_index::BackendKind::Pinecone => {
                if self.backend.pinecone.host.is_empty() {
                    return fail("backend.pinecone.host is required".into());
                }
                if self.secrets.pinecone_api_key.is_none() {
                    return fail("PRIOR_PINECONE_API_KEY is required for the pinecone backend".into());
                }
                if self.backend.pinecone.batch_size == 0 {
                    return fail("backend.pinecone.batch_size must be positive".into());
                }
            }
            prior_index::BackendKind::Qdrant => {
                if self.backend.qdrant.collection.is_empty() {
                    return fail("backend.qdrant.collection must not be empty".into());
                }
            }
            prior_index::BackendKind::Table => {
                if self.backend.table.path.is_empty() {
                    return fail("backend.table.path must not be empty".into());
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_issues: self.sync.max_issues,
            force_refresh: self.sync.force_refresh,
            policy: self.sync.policy,
            embed_batch_size: self.embedding.batch_size,
        }
    }

    #[must_use]
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            limit: self.search.limit,
        }
    }
}
