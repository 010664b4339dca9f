//! Vector store abstraction and its adapters.
//!
//! Each adapter maps the document model onto its store's native shape:
//! one namespace/collection/table shared by every repository, with the
//! repository carried in metadata and used as a query filter. Point ids
//! are derived from `(repo, key)` so re-indexing a document overwrites it
//! on stores with primary keys.

#[cfg(any(test, feature = "mock"))]
pub mod memory;
pub mod pinecone;
pub mod qdrant;
pub mod table;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{DocumentMetadata, EmbeddedDocument, sentinel_key};
use crate::error::ErrorKind;

#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryBackend;
pub use pinecone::PineconeBackend;
pub use qdrant::QdrantBackend;
pub use table::TableBackend;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("probe error: {0}")]
    Probe(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(
        "{target} stores {stored}-dimensional vectors but the embedder produces {configured}; \
         rerun with a forced rebuild or point at a different index"
    )]
    DimensionMismatch {
        target: String,
        stored: u64,
        configured: u64,
    },
    #[error("{target} did not report written documents after {attempts} attempts")]
    NotReady { target: String, attempts: u32 },
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Data,
            Self::Connection(_)
            | Self::Collection(_)
            | Self::Upsert(_)
            | Self::Search(_)
            | Self::Delete(_)
            | Self::Probe(_)
            | Self::NotReady { .. } => ErrorKind::Transport,
        }
    }
}

/// One nearest-neighbour match. Higher `score` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub metadata: DocumentMetadata,
    pub score: f32,
}

/// Storage-agnostic contract every vector store adapter fulfils.
pub trait VectorIndexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify the store can hold vectors of the configured dimension.
    ///
    /// With `force_rebuild` an adapter that can recreate its storage does so on
    /// mismatch; otherwise a mismatch is a [`BackendError::DimensionMismatch`].
    fn ensure_compatible(&self, force_rebuild: bool) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Whether a document with `key` is stored for `repo`.
    fn contains(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<bool, BackendError>>;

    /// Whether `repo` has been indexed at least once (its sentinel is stored).
    fn exists(&self, repo: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let key = sentinel_key(repo);
        let repo = repo.to_owned();
        Box::pin(async move { self.contains(&repo, &key).await })
    }

    /// Replace every stored document of `repo` with `docs`.
    fn bulk_index(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Add `docs` to the index without touching other documents of `repo`.
    fn upsert(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Top `k` matches for `vector` within `repo`, best first. The sentinel is
    /// never returned.
    fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        repo: &str,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, BackendError>>;

    fn delete(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<(), BackendError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted namespace store reached over REST.
    Pinecone,
    /// Embedded `LanceDB` table.
    #[default]
    #[serde(alias = "lancedb")]
    Table,
    /// Qdrant collection over gRPC.
    Qdrant,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pinecone => "pinecone",
            Self::Table => "table",
            Self::Qdrant => "qdrant",
        })
    }
}

const POINT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5d, 0x2a, 0x8c, 0x41, 0x9e, 0x07, 0x4b, 0x3f, 0xa1, 0x6c, 0x0e, 0x72, 0xd4, 0x58, 0xb9, 0x13,
]);

/// Deterministic point id for a document of a repository.
#[must_use]
pub fn point_id(repo: &str, key: &str) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, format!("{repo}/{key}").as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionAction {
    Compatible,
    Recreate,
}

/// Decide what to do when a store already holds vectors of size `stored`.
///
/// # Errors
///
/// Returns [`BackendError::DimensionMismatch`] when sizes differ and no rebuild
/// was requested.
pub fn check_dimension(
    target: &str,
    stored: Option<u64>,
    configured: u64,
    force_rebuild: bool,
) -> Result<DimensionAction, BackendError> {
    match stored {
        None => Ok(DimensionAction::Compatible),
        Some(stored) if stored == configured => Ok(DimensionAction::Compatible),
        Some(_) if force_rebuild => Ok(DimensionAction::Recreate),
        Some(stored) => Err(BackendError::DimensionMismatch {
            target: target.to_owned(),
            stored,
            configured,
        }),
    }
}
