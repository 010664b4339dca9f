//! In-process issue source for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use crate::source::{Comment, Issue, IssueSource, SourceError};

#[derive(Debug, Clone, Default)]
pub struct MockIssueSource {
    issues: Vec<Issue>,
    comments: HashMap<u64, Vec<Comment>>,
    /// Fail the listing after yielding this many issues.
    fail_after: Option<usize>,
    comment_fetches: Arc<Mutex<Vec<u64>>>,
}

impl MockIssueSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Attach comments to an issue, updating its comment count.
    #[must_use]
    pub fn with_comments(mut self, number: u64, comments: Vec<Comment>) -> Self {
        if let Some(issue) = self.issues.iter_mut().find(|i| i.number == number) {
            issue.comment_count = comments.len() as u64;
        }
        self.comments.insert(number, comments);
        self
    }

    #[must_use]
    pub fn failing_after(mut self, yielded: usize) -> Self {
        self.fail_after = Some(yielded);
        self
    }

    /// Issue numbers whose comments were requested, in call order.
    #[must_use]
    pub fn comment_fetches(&self) -> Vec<u64> {
        self.comment_fetches.lock().unwrap().clone()
    }

    fn newest_first(&self) -> Vec<Issue> {
        let mut issues = self.issues.clone();
        issues.sort_by(|a, b| b.number.cmp(&a.number));
        issues
    }
}

impl IssueSource for MockIssueSource {
    fn list_issues<'a>(&'a self, repo: &'a str) -> BoxStream<'a, Result<Issue, SourceError>> {
        let mut items: Vec<Result<Issue, SourceError>> =
            self.newest_first().into_iter().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(SourceError::Request(format!(
                "listing {repo} interrupted"
            ))));
        }
        stream::iter(items).boxed()
    }

    async fn get_issue(&self, _repo: &str, number: u64) -> Result<Issue, SourceError> {
        self.issues
            .iter()
            .find(|i| i.number == number)
            .cloned()
            .ok_or(SourceError::NotFound(number))
    }

    async fn get_issue_comments(
        &self,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<Comment>, SourceError> {
        self.comment_fetches.lock().unwrap().push(number);
        if !self.issues.iter().any(|i| i.number == number) {
            return Err(SourceError::NotFound(number));
        }
        Ok(self.comments.get(&number).cloned().unwrap_or_default())
    }
}

fn timestamp(number: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + i64::try_from(number).unwrap_or(0) * 3600, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// An issue of `acme/widgets` with a deterministic URL and timestamp.
#[must_use]
pub fn issue(number: u64, title: &str, body: &str) -> Issue {
    Issue {
        number,
        title: title.to_owned(),
        body: Some(body.to_owned()),
        author: "octocat".into(),
        created_at: timestamp(number),
        url: format!("https://github.com/acme/widgets/issues/{number}"),
        is_pull_request: false,
        comment_count: 0,
    }
}

#[must_use]
pub fn pull_request(number: u64, title: &str) -> Issue {
    Issue {
        is_pull_request: true,
        url: format!("https://github.com/acme/widgets/pull/{number}"),
        ..issue(number, title, "")
    }
}

#[must_use]
pub fn comment(issue: u64, id: u64, body: &str) -> Comment {
    Comment {
        id,
        body: body.to_owned(),
        author: "hubot".into(),
        created_at: timestamp(issue),
        url: format!("https://github.com/acme/widgets/issues/{issue}#issuecomment-{id}"),
    }
}
