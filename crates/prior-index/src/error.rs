//! Error types for prior-index.

use crate::backend::BackendError;
use crate::source::SourceError;

/// Coarse classification used to decide whether a failure aborts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or auth failure talking to a backend, embedder, or issue source.
    Transport,
    /// Missing or invalid configuration, detected before any work starts.
    Configuration,
    /// Stored vector size disagrees with the configured embedder.
    DimensionMismatch,
    /// A single document could not be indexed.
    Data,
}

/// Errors that can occur during indexing and search.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Vector store failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embed(#[from] prior_embed::EmbedError),

    /// Issue source failure.
    #[error("issue source error: {0}")]
    Source(#[from] SourceError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A document that cannot be indexed.
    #[error("invalid document: {0}")]
    Data(String),
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(e) => e.kind(),
            Self::Embed(_) | Self::Source(_) => ErrorKind::Transport,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Data(_) => ErrorKind::Data,
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_keeps_its_kind() {
        let err = IndexError::from(BackendError::DimensionMismatch {
            target: "issues".into(),
            stored: 768,
            configured: 1536,
        });
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert!(err.to_string().contains("768"));
    }

    #[test]
    fn config_is_configuration_kind() {
        assert_eq!(
            IndexError::Config("missing api key".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn embed_is_transport_kind() {
        let err = IndexError::from(prior_embed::EmbedError::Other("down".into()));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
