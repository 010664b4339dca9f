//! Similarity index over a repository's issue history.
//!
//! Issues and their comments are normalized into [`document::Document`]s, embedded,
//! and written to one of several vector stores behind [`backend::VectorIndexBackend`].
//! [`sync::IndexSynchronizer`] decides per run whether a repository needs a full
//! build or an incremental top-up, and [`search::SimilaritySearcher`] answers
//! "which past issues look like this one" queries.

pub mod backend;
pub mod document;
pub mod embedding;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod search;
pub mod source;
pub mod sync;

pub use backend::{BackendError, BackendKind, SearchHit, VectorIndexBackend};
pub use error::{ErrorKind, IndexError, Result};
pub use search::{SearchConfig, SimilarIssue, SimilaritySearcher, format_markdown};
pub use source::{Comment, Issue, IssueSource, SourceError};
pub use sync::{IndexSynchronizer, SyncConfig, SyncPlan, SyncPolicy, SyncReport};
