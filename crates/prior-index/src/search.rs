//! "Have we seen this before?" queries against an indexed repository.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Write as _;
use std::sync::Arc;

use prior_embed::{EmbedError, Embedder};
use serde::Serialize;

use crate::backend::{SearchHit, VectorIndexBackend};
use crate::document::{DocKey, issue_document};
use crate::error::{IndexError, Result};
use crate::source::{Comment, IssueSource};

pub const DEFAULT_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Nearest neighbours requested from the backend, before de-duplication.
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarIssue {
    pub number: u64,
    pub title: String,
    pub url: String,
    /// Similarity with two decimals, e.g. `"0.87"`.
    pub score: String,
}

/// A hit that survived filtering, before its permalink is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub number: u64,
    pub key: DocKey,
    pub title: String,
    pub issue_url: String,
    pub score: f32,
}

/// Drop the sentinel, unknown keys and the originating issue, keep the best
/// hit per issue, and order by descending score.
#[must_use]
pub fn rank_hits(hits: Vec<SearchHit>, origin: Option<u64>) -> Vec<RankedHit> {
    let mut best: HashMap<u64, RankedHit> = HashMap::new();
    for hit in hits {
        let Some(key) = hit.metadata.doc_key() else {
            tracing::debug!(key = %hit.metadata.key, "ignoring hit with foreign key");
            continue;
        };
        let Some(number) = key.issue_number() else {
            continue;
        };
        if origin == Some(number) {
            continue;
        }
        let candidate = RankedHit {
            number,
            key,
            title: hit.metadata.title,
            issue_url: hit.metadata.url,
            score: hit.score,
        };
        match best.entry(number) {
            Entry::Occupied(mut e) => {
                if candidate.score > e.get().score {
                    e.insert(candidate);
                }
            }
            Entry::Vacant(e) => {
                e.insert(candidate);
            }
        }
    }
    let mut ranked: Vec<RankedHit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.number.cmp(&b.number))
    });
    ranked
}

#[must_use]
pub fn format_score(score: f32) -> String {
    format!("{score:.2}")
}

/// Render results as a Markdown list suitable for an issue comment.
#[must_use]
pub fn format_markdown(results: &[SimilarIssue]) -> String {
    if results.is_empty() {
        return "No similar issues found.\n".to_owned();
    }
    let mut out = String::from("Possibly related issues:\n\n");
    for r in results {
        let _ = writeln!(
            out,
            "- [#{} {}]({}) (similarity {})",
            r.number,
            r.title.replace(['[', ']'], ""),
            r.url,
            r.score
        );
    }
    out
}

pub struct SimilaritySearcher<E, S> {
    backend: Arc<dyn VectorIndexBackend>,
    embedder: Arc<E>,
    source: Arc<S>,
    config: SearchConfig,
}

impl<E: Embedder, S: IssueSource> SimilaritySearcher<E, S> {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VectorIndexBackend>,
        embedder: Arc<E>,
        source: Arc<S>,
        config: SearchConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            source,
            config,
        }
    }

    /// Issues similar to free-form `query`. Hits on `origin` are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be embedded or the backend fails.
    pub async fn find_similar(
        &self,
        repo: &str,
        query: &str,
        origin: Option<u64>,
    ) -> Result<Vec<SimilarIssue>> {
        let vector = self.embed_query(query).await?;
        let hits = self
            .backend
            .search(vector, self.config.limit, repo)
            .await?;
        let ranked = rank_hits(hits, origin);
        tracing::debug!(repo, hits = ranked.len(), "similarity search ranked");
        self.resolve(repo, ranked).await
    }

    /// Issues similar to existing issue `number`, excluding itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue cannot be fetched, has no indexable text,
    /// or the search fails.
    pub async fn find_similar_to_issue(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<Vec<SimilarIssue>> {
        let issue = self.source.get_issue(repo, number).await?;
        let doc = issue_document(repo, &issue, self.embedder.max_input_tokens())
            .map_err(|reason| IndexError::Data(format!("issue #{number}: {reason}")))?;
        self.find_similar(repo, &doc.text, Some(number)).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(IndexError::Data("empty search query".into()));
        }
        let mut vectors = self.embedder.embed(&[query.to_owned()]).await?;
        let vector = vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })?;
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(EmbedError::Dimension {
                expected,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }

    async fn resolve(&self, repo: &str, ranked: Vec<RankedHit>) -> Result<Vec<SimilarIssue>> {
        let mut comments: HashMap<u64, Vec<Comment>> = HashMap::new();
        let mut results = Vec::with_capacity(ranked.len());

        for hit in ranked {
            let url = match hit.key {
                DocKey::Comment { number, ordinal } => {
                    if let Entry::Vacant(e) = comments.entry(number) {
                        match self.source.get_issue_comments(repo, number).await {
                            Ok(fetched) => {
                                e.insert(fetched);
                            }
                            Err(err) => {
                                tracing::warn!(
                                    repo,
                                    number,
                                    "comment permalink lookup failed, linking the issue: {err}"
                                );
                                e.insert(Vec::new());
                            }
                        }
                    }
                    comments
                        .get(&number)
                        .and_then(|c| c.get(ordinal))
                        .map_or_else(|| hit.issue_url.clone(), |c| c.url.clone())
                }
                DocKey::Issue { .. } | DocKey::Sentinel { .. } => hit.issue_url.clone(),
            };
            results.push(SimilarIssue {
                number: hit.number,
                title: hit.title,
                url,
                score: format_score(hit.score),
            });
        }
        Ok(results)
    }
}
