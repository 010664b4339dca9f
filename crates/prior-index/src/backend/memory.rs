use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{
    BackendError, BoxFuture, DimensionAction, SearchHit, VectorIndexBackend, check_dimension,
};
use crate::document::{DocKey, DocumentMetadata, EmbeddedDocument};

struct StoredDoc {
    vector: Vec<f32>,
    metadata: DocumentMetadata,
}

/// Process-local backend with cosine scoring. Records writes so tests can
/// assert on what a sync did.
pub struct MemoryBackend {
    dimension: u64,
    repos: RwLock<HashMap<String, BTreeMap<String, StoredDoc>>>,
    stored_dimension: RwLock<Option<u64>>,
    writes: RwLock<Vec<WriteCall>>,
    probes: AtomicUsize,
    fail_writes: AtomicBool,
}

/// A recorded `bulk_index` or `upsert` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Bulk { repo: String, keys: Vec<String> },
    Upsert { repo: String, keys: Vec<String> },
}

impl MemoryBackend {
    #[must_use]
    pub fn new(dimension: u64) -> Self {
        Self {
            dimension,
            repos: RwLock::new(HashMap::new()),
            stored_dimension: RwLock::new(None),
            writes: RwLock::new(Vec::new()),
            probes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Pretend previously written vectors have size `dimension`.
    #[must_use]
    pub fn with_stored_dimension(self, dimension: u64) -> Self {
        if let Ok(mut d) = self.stored_dimension.write() {
            *d = Some(dimension);
        }
        self
    }

    /// Make every subsequent write fail with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.read().map(|w| w.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.writes()
            .iter()
            .filter(|w| matches!(w, WriteCall::Upsert { .. }))
            .count()
    }

    /// Number of `contains`/`exists` probes served.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn keys(&self, repo: &str) -> Vec<String> {
        self.repos
            .read()
            .ok()
            .and_then(|r| r.get(repo).map(|docs| docs.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn record(&self, call: WriteCall) -> Result<(), BackendError> {
        self.writes
            .write()
            .map_err(|e| BackendError::Upsert(e.to_string()))?
            .push(call);
        Ok(())
    }

    fn write_docs(
        &self,
        repo: &str,
        docs: Vec<EmbeddedDocument>,
        replace: bool,
    ) -> Result<(), BackendError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Upsert("simulated write failure".into()));
        }
        for doc in &docs {
            if doc.vector.len() as u64 != self.dimension {
                return Err(BackendError::Upsert(format!(
                    "vector for {} has {} dimensions, expected {}",
                    doc.document.key,
                    doc.vector.len(),
                    self.dimension
                )));
            }
        }
        let keys: Vec<String> = docs.iter().map(|d| d.document.key.clone()).collect();

        let mut repos = self
            .repos
            .write()
            .map_err(|e| BackendError::Upsert(e.to_string()))?;
        let entry = repos.entry(repo.to_owned()).or_default();
        if replace {
            entry.clear();
        }
        for doc in docs {
            entry.insert(
                doc.document.key.clone(),
                StoredDoc {
                    metadata: doc.document.metadata(),
                    vector: doc.vector,
                },
            );
        }
        drop(repos);

        if let Ok(mut d) = self.stored_dimension.write() {
            *d = Some(self.dimension);
        }

        let repo = repo.to_owned();
        self.record(if replace {
            WriteCall::Bulk { repo, keys }
        } else {
            WriteCall::Upsert { repo, keys }
        })
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndexBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn ensure_compatible(&self, force_rebuild: bool) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let stored = *self
                .stored_dimension
                .read()
                .map_err(|e| BackendError::Collection(e.to_string()))?;
            if check_dimension("memory", stored, self.dimension, force_rebuild)?
                == DimensionAction::Recreate
            {
                self.repos
                    .write()
                    .map_err(|e| BackendError::Collection(e.to_string()))?
                    .clear();
                *self
                    .stored_dimension
                    .write()
                    .map_err(|e| BackendError::Collection(e.to_string()))? = None;
            }
            Ok(())
        })
    }

    fn contains(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let repo = repo.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let repos = self
                .repos
                .read()
                .map_err(|e| BackendError::Probe(e.to_string()))?;
            Ok(repos.get(&repo).is_some_and(|docs| docs.contains_key(&key)))
        })
    }

    fn bulk_index(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move { self.write_docs(&repo, docs, true) })
    }

    fn upsert(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move { self.write_docs(&repo, docs, false) })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        repo: &str,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            let repos = self
                .repos
                .read()
                .map_err(|e| BackendError::Search(e.to_string()))?;
            let Some(docs) = repos.get(&repo) else {
                return Ok(Vec::new());
            };
            let mut hits: Vec<SearchHit> = docs
                .values()
                .filter(|d| !d.metadata.doc_key().is_some_and(|key| key.is_sentinel()))
                .map(|d| SearchHit {
                    score: cosine_similarity(&vector, &d.vector),
                    metadata: d.metadata.clone(),
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(k);
            Ok(hits)
        })
    }

    fn delete(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            let mut repos = self
                .repos
                .write()
                .map_err(|e| BackendError::Delete(e.to_string()))?;
            if let Some(docs) = repos.get_mut(&repo) {
                docs.remove(&key);
            }
            Ok(())
        })
    }
}

/// Keys of stored issue-level documents, for assertions.
#[must_use]
pub fn issue_numbers(keys: &[String]) -> Vec<u64> {
    keys.iter()
        .filter_map(|k| match DocKey::parse(k)? {
            DocKey::Issue { number } => Some(number),
            _ => None,
        })
        .collect()
}
