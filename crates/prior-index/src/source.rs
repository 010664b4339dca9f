//! Issue tracker abstraction consumed by the synchronizer and searcher.

use std::future::Future;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("credentials rejected (status {0})")]
    Unauthorized(u16),
    #[error("issue #{0} not found")]
    NotFound(u64),
    #[error("rate limited")]
    RateLimited,
    #[error("malformed response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
    /// Pull and merge requests share the issue namespace on most trackers.
    pub is_pull_request: bool,
    pub comment_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

pub trait IssueSource: Send + Sync {
    /// Stream a repository's issues, newest first.
    ///
    /// The incremental sync relies on this ordering: an item's position must never
    /// precede that of a more recently created issue.
    fn list_issues<'a>(&'a self, repo: &'a str) -> BoxStream<'a, Result<Issue, SourceError>>;

    /// Fetch a single issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker is unreachable or the issue does not exist.
    fn get_issue(
        &self,
        repo: &str,
        number: u64,
    ) -> impl Future<Output = Result<Issue, SourceError>> + Send;

    /// Fetch every comment on an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker is unreachable or the issue does not exist.
    fn get_issue_comments(
        &self,
        repo: &str,
        number: u64,
    ) -> impl Future<Output = Result<Vec<Comment>, SourceError>> + Send;
}
