//! GitHub REST issue source.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use prior_index::{Comment, Issue, IssueSource, SourceError};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{GitHubConfig, Secret};

const API_VERSION: &str = "2022-11-28";

#[derive(Clone)]
pub struct GitHubIssueSource {
    client: reqwest::Client,
    api_url: String,
    token: Option<Secret>,
    per_page: u32,
}

impl fmt::Debug for GitHubIssueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubIssueSource")
            .field("api_url", &self.api_url)
            .field("token", &self.token)
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    body: Option<String>,
    user: Option<RawUser>,
    created_at: DateTime<Utc>,
    html_url: String,
    #[serde(default)]
    comments: u64,
    /// Present only on pull requests.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    body: Option<String>,
    user: Option<RawUser>,
    created_at: DateTime<Utc>,
    html_url: String,
}

/// Deleted accounts come back as `null` users.
fn login(user: Option<RawUser>) -> String {
    user.map_or_else(|| "ghost".to_owned(), |u| u.login)
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            author: login(raw.user),
            created_at: raw.created_at,
            url: raw.html_url,
            is_pull_request: raw.pull_request.is_some(),
            comment_count: raw.comments,
        }
    }
}

impl From<RawComment> for Comment {
    fn from(raw: RawComment) -> Self {
        Self {
            id: raw.id,
            body: raw.body.unwrap_or_default(),
            author: login(raw.user),
            created_at: raw.created_at,
            url: raw.html_url,
        }
    }
}

/// Check that `repo` has the `owner/name` shape.
///
/// # Errors
///
/// Returns [`SourceError::Request`] for anything else.
pub fn validate_repo(repo: &str) -> Result<(), SourceError> {
    let valid_part = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match repo.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(SourceError::Request(format!(
            "repository must look like owner/name, got {repo:?}"
        ))),
    }
}

impl GitHubIssueSource {
    #[must_use]
    pub fn new(config: &GitHubConfig, token: Option<Secret>) -> Self {
        let mut api_url = config.api_url.clone();
        while api_url.ends_with('/') {
            api_url.pop();
        }
        Self {
            client: prior_embed::http::default_client(),
            api_url,
            token,
            per_page: config.per_page.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        missing: Option<u64>,
    ) -> Result<T, SourceError> {
        let mut req = self
            .client
            .get(format!("{}{path}", self.api_url))
            .query(query)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose());
        }

        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;
        let status = response.status();
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .is_some_and(|v| v.as_bytes() == b"0");

        match status {
            s if s.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| SourceError::Parse(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(SourceError::Unauthorized(status.as_u16())),
            StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited),
            StatusCode::FORBIDDEN if exhausted => Err(SourceError::RateLimited),
            StatusCode::FORBIDDEN => Err(SourceError::Unauthorized(status.as_u16())),
            StatusCode::NOT_FOUND => Err(missing.map_or_else(
                || SourceError::Request(format!("{path} not found")),
                SourceError::NotFound,
            )),
            _ => {
                let text = response.text().await.unwrap_or_default();
                tracing::error!("GitHub API error {status}: {text}");
                Err(SourceError::Request(format!("github returned {status}")))
            }
        }
    }

    fn page_query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("per_page", self.per_page.to_string()),
            ("page", page.to_string()),
        ]
    }
}

impl IssueSource for GitHubIssueSource {
    fn list_issues<'a>(&'a self, repo: &'a str) -> BoxStream<'a, Result<Issue, SourceError>> {
        if let Err(e) = validate_repo(repo) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let path = format!("/repos/{repo}/issues");
        stream::try_unfold(Some(1u32), move |page| {
            let path = path.clone();
            async move {
                let Some(page) = page else {
                    return Ok::<_, SourceError>(None);
                };
                let mut query = vec![
                    ("state", "all".to_owned()),
                    ("sort", "created".to_owned()),
                    ("direction", "desc".to_owned()),
                ];
                query.extend(self.page_query(page));
                let raw: Vec<RawIssue> = self.get(&path, &query, None).await?;
                tracing::debug!(repo, page, count = raw.len(), "fetched issue page");

                let next = (raw.len() >= self.per_page as usize).then_some(page + 1);
                let issues: Vec<Result<Issue, SourceError>> =
                    raw.into_iter().map(|r| Ok(Issue::from(r))).collect();
                Ok(Some((stream::iter(issues), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue, SourceError> {
        validate_repo(repo)?;
        let raw: RawIssue = self
            .get(&format!("/repos/{repo}/issues/{number}"), &[], Some(number))
            .await?;
        Ok(raw.into())
    }

    async fn get_issue_comments(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<Vec<Comment>, SourceError> {
        validate_repo(repo)?;
        let path = format!("/repos/{repo}/issues/{number}/comments");
        let mut comments = Vec::new();
        let mut page = 1;
        loop {
            let raw: Vec<RawComment> = self
                .get(&path, &self.page_query(page), Some(number))
                .await?;
            let full = raw.len() >= self.per_page as usize;
            comments.extend(raw.into_iter().map(Comment::from));
            if !full {
                break;
            }
            page += 1;
        }
        Ok(comments)
    }
}
