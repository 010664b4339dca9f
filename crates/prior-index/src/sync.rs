//! Keeps a repository's index in step with its issue tracker.
//!
//! Every run re-derives its state from the backend: one `exists` probe picks a
//! [`SyncPlan`], and the incremental path probes issue keys newest-first until it
//! meets an issue that is already indexed. Nothing is cached between runs, so an
//! interrupted run is repaired by simply running again.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use prior_embed::Embedder;
use serde::{Deserialize, Serialize};

use crate::backend::VectorIndexBackend;
use crate::document::{DocKey, Document, comment_documents, issue_document, sentinel_document};
use crate::embedding::{DEFAULT_BATCH_SIZE, embed_documents};
use crate::error::{IndexError, Result};
use crate::source::{Issue, IssueSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPlan {
    /// Repository never indexed.
    FullBuild,
    /// Repository indexed, rebuild requested.
    ForcedRebuild,
    /// Repository indexed; top up with issues created since.
    Incremental,
}

impl SyncPlan {
    #[must_use]
    pub fn decide(exists: bool, force_refresh: bool) -> Self {
        match (exists, force_refresh) {
            (false, _) => Self::FullBuild,
            (true, true) => Self::ForcedRebuild,
            (true, false) => Self::Incremental,
        }
    }
}

impl std::fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::FullBuild => "full build",
            Self::ForcedRebuild => "forced rebuild",
            Self::Incremental => "incremental",
        })
    }
}

/// How far an incremental run looks for unindexed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Stop at the first issue whose key is already stored. New comments on
    /// older issues stay unindexed until the next forced rebuild.
    #[default]
    StopAtFirstIndexed,
    /// Probe every issue and eligible comment within `max_issues`.
    ProbeAll,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_issues: usize,
    pub force_refresh: bool,
    pub policy: SyncPolicy,
    pub embed_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_issues: 1000,
            force_refresh: false,
            policy: SyncPolicy::default(),
            embed_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub repo: String,
    pub plan: SyncPlan,
    pub issues_scanned: usize,
    pub new_issues: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub embedding_fallbacks: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(repo: &str, plan: SyncPlan) -> Self {
        Self {
            repo: repo.to_owned(),
            plan,
            issues_scanned: 0,
            new_issues: 0,
            documents_indexed: 0,
            documents_skipped: 0,
            embedding_fallbacks: 0,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    All,
    /// End at the first issue whose key is already stored, excluding it.
    UntilIndexed,
}

pub struct IndexSynchronizer<E, S> {
    backend: Arc<dyn VectorIndexBackend>,
    embedder: Arc<E>,
    source: Arc<S>,
    config: SyncConfig,
}

impl<E: Embedder, S: IssueSource> IndexSynchronizer<E, S> {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VectorIndexBackend>,
        embedder: Arc<E>,
        source: Arc<S>,
        config: SyncConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            source,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bring `repo`'s index up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is incompatible or unreachable, the issue
    /// source fails, or no document could be embedded. Nothing is written when
    /// the issue source fails.
    pub async fn sync(&self, repo: &str) -> Result<SyncReport> {
        let started = Instant::now();
        self.backend
            .ensure_compatible(self.config.force_refresh)
            .await?;
        let exists = self.backend.exists(repo).await?;
        let plan = SyncPlan::decide(exists, self.config.force_refresh);
        tracing::info!(repo, backend = self.backend.name(), %plan, "starting sync");

        let mut report = SyncReport::new(repo, plan);
        match plan {
            SyncPlan::FullBuild | SyncPlan::ForcedRebuild => {
                self.full_build(repo, &mut report).await?;
            }
            SyncPlan::Incremental => self.incremental(repo, &mut report).await?,
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            repo,
            %plan,
            scanned = report.issues_scanned,
            new_issues = report.new_issues,
            indexed = report.documents_indexed,
            skipped = report.documents_skipped,
            fallbacks = report.embedding_fallbacks,
            duration_ms = report.duration_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Delete individual documents from `repo`'s index.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed delete.
    pub async fn remove(&self, repo: &str, keys: &[String]) -> Result<usize> {
        for key in keys {
            if DocKey::parse(key).is_none() {
                return Err(IndexError::Data(format!("not a document key: {key}")));
            }
        }
        for key in keys {
            self.backend.delete(repo, key).await?;
            tracing::debug!(repo, key, "document removed");
        }
        Ok(keys.len())
    }

    async fn full_build(&self, repo: &str, report: &mut SyncReport) -> Result<()> {
        let issues = self.collect_issues(repo, Scan::All).await?;
        report.issues_scanned = issues.len();
        report.new_issues = issues.len();

        let mut docs = Vec::new();
        for issue in &issues {
            let (issue_docs, skipped) = self.issue_corpus(repo, issue).await?;
            docs.extend(issue_docs);
            report.documents_skipped += skipped;
        }
        docs.push(sentinel_document(repo));

        let outcome =
            embed_documents(self.embedder.as_ref(), docs, self.config.embed_batch_size).await?;
        report.embedding_fallbacks = outcome.zero_filled;
        report.documents_indexed = outcome.documents.len();
        self.backend.bulk_index(outcome.documents, repo).await?;
        Ok(())
    }

    async fn incremental(&self, repo: &str, report: &mut SyncReport) -> Result<()> {
        let docs = match self.config.policy {
            SyncPolicy::StopAtFirstIndexed => self.new_issue_docs(repo, report).await?,
            SyncPolicy::ProbeAll => self.missing_docs(repo, report).await?,
        };

        if docs.is_empty() {
            tracing::info!(repo, "index already up to date");
            return Ok(());
        }

        let outcome =
            embed_documents(self.embedder.as_ref(), docs, self.config.embed_batch_size).await?;
        report.embedding_fallbacks = outcome.zero_filled;
        report.documents_indexed = outcome.documents.len();
        self.backend.upsert(outcome.documents, repo).await?;
        Ok(())
    }

    /// Issues created since the newest indexed one, plus their comments.
    async fn new_issue_docs(&self, repo: &str, report: &mut SyncReport) -> Result<Vec<Document>> {
        let issues = self.collect_issues(repo, Scan::UntilIndexed).await?;
        report.issues_scanned = issues.len();
        report.new_issues = issues.len();

        let mut docs = Vec::new();
        for issue in &issues {
            let (issue_docs, skipped) = self.issue_corpus(repo, issue).await?;
            docs.extend(issue_docs);
            report.documents_skipped += skipped;
        }
        Ok(docs)
    }

    /// Every document within `max_issues` whose key is not stored yet.
    async fn missing_docs(&self, repo: &str, report: &mut SyncReport) -> Result<Vec<Document>> {
        let issues = self.collect_issues(repo, Scan::All).await?;
        report.issues_scanned = issues.len();

        let mut docs = Vec::new();
        for issue in &issues {
            let (issue_docs, skipped) = self.issue_corpus(repo, issue).await?;
            report.documents_skipped += skipped;
            if issue_docs.is_empty() {
                continue;
            }
            let issue_key = DocKey::issue(issue.number).to_string();
            if !self.backend.contains(repo, &issue_key).await? {
                report.new_issues += 1;
                docs.extend(issue_docs);
                continue;
            }
            for doc in issue_docs {
                if !self.backend.contains(repo, &doc.key).await? {
                    docs.push(doc);
                }
            }
        }
        Ok(docs)
    }

    /// Read up to `max_issues` issues newest-first, skipping pull requests.
    async fn collect_issues(&self, repo: &str, scan: Scan) -> Result<Vec<Issue>> {
        let mut stream = self.source.list_issues(repo);
        let mut issues = Vec::new();

        while issues.len() < self.config.max_issues {
            let Some(item) = stream.next().await else {
                break;
            };
            let issue = match item {
                Ok(issue) => issue,
                Err(e) => {
                    tracing::error!(
                        repo,
                        identified = issues.len(),
                        "issue listing failed, aborting without writing: {e}"
                    );
                    return Err(e.into());
                }
            };
            if issue.is_pull_request {
                tracing::trace!(repo, number = issue.number, "skipping pull request");
                continue;
            }
            if scan == Scan::UntilIndexed
                && self
                    .backend
                    .contains(repo, &DocKey::issue(issue.number).to_string())
                    .await?
            {
                tracing::debug!(repo, number = issue.number, "reached indexed issue");
                break;
            }
            issues.push(issue);
        }
        Ok(issues)
    }

    /// Issue document plus eligible comment documents, and how many were skipped.
    async fn issue_corpus(&self, repo: &str, issue: &Issue) -> Result<(Vec<Document>, usize)> {
        let budget = self.embedder.max_input_tokens();
        let mut docs = Vec::new();
        let mut skipped = 0;

        // Comments are only indexed alongside their issue document: the issue
        // key is what marks the whole issue as indexed.
        match issue_document(repo, issue, budget) {
            Ok(doc) => docs.push(doc),
            Err(reason) => {
                let err = IndexError::Data(format!("issue #{}: {reason}", issue.number));
                tracing::warn!(
                    repo,
                    kind = ?err.kind(),
                    comments = issue.comment_count,
                    "{err}, skipping its comments too"
                );
                let comments = usize::try_from(issue.comment_count).unwrap_or(usize::MAX);
                return Ok((docs, comments.saturating_add(1)));
            }
        }

        if issue.comment_count > 0 {
            let comments = self
                .source
                .get_issue_comments(repo, issue.number)
                .await?;
            let (comment_docs, comment_skips) =
                comment_documents(repo, issue, &comments, budget);
            docs.extend(comment_docs);
            skipped += comment_skips;
        }
        Ok((docs, skipped))
    }
}
