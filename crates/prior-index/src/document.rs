//! Indexable documents and the key scheme that addresses them.
//!
//! Every issue contributes one issue-level document plus one document per
//! eligible comment. Keys are stable across runs so the synchronizer can probe
//! a backend for "already indexed" without any local state:
//!
//! - `issue_{number}.issue`
//! - `issue_{number}.comment_{ordinal}` (ordinal into the issue's comment list)
//! - `example_issue_{repo}`, the per-repository sentinel

use std::fmt;

use chrono::{DateTime, Utc};
use prior_embed::estimate_tokens;
use serde::{Deserialize, Serialize};

use crate::source::{Comment, Issue};

/// Comments shorter than this carry too little signal ("thanks", "+1").
pub const MIN_COMMENT_WORDS: usize = 10;

const SENTINEL_PREFIX: &str = "example_issue_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Issue,
    Comment,
}

/// Decoded document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    Issue { number: u64 },
    Comment { number: u64, ordinal: usize },
    Sentinel { repo: String },
}

impl DocKey {
    #[must_use]
    pub fn issue(number: u64) -> Self {
        Self::Issue { number }
    }

    #[must_use]
    pub fn comment(number: u64, ordinal: usize) -> Self {
        Self::Comment { number, ordinal }
    }

    #[must_use]
    pub fn sentinel(repo: &str) -> Self {
        Self::Sentinel {
            repo: repo.to_owned(),
        }
    }

    /// Decode a stored key. Returns `None` for keys not produced by this scheme.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(repo) = key.strip_prefix(SENTINEL_PREFIX) {
            return Some(Self::sentinel(repo));
        }
        let rest = key.strip_prefix("issue_")?;
        let (number, suffix) = rest.split_once('.')?;
        let number = number.parse().ok()?;
        if suffix == "issue" {
            return Some(Self::issue(number));
        }
        let ordinal = suffix.strip_prefix("comment_")?.parse().ok()?;
        Some(Self::comment(number, ordinal))
    }

    #[must_use]
    pub fn issue_number(&self) -> Option<u64> {
        match self {
            Self::Issue { number } | Self::Comment { number, .. } => Some(*number),
            Self::Sentinel { .. } => None,
        }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel { .. })
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue { number } => write!(f, "issue_{number}.issue"),
            Self::Comment { number, ordinal } => write!(f, "issue_{number}.comment_{ordinal}"),
            Self::Sentinel { repo } => write!(f, "{SENTINEL_PREFIX}{repo}"),
        }
    }
}

#[must_use]
pub fn sentinel_key(repo: &str) -> String {
    DocKey::sentinel(repo).to_string()
}

/// Everything a backend stores next to a vector. Flat, so every backend's
/// payload model can hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub key: String,
    pub repo: String,
    pub level: Level,
    pub title: String,
    pub url: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentMetadata {
    #[must_use]
    pub fn doc_key(&self) -> Option<DocKey> {
        DocKey::parse(&self.key)
    }

    /// Flat JSON object form used as a backend payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "metadata serialized to non-object: {other}"
            ))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if required fields are missing or malformed.
    pub fn from_payload(
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(payload))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub text: String,
    pub repo: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub level: Level,
    pub title: String,
    pub url: String,
}

impl Document {
    #[must_use]
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            key: self.key.clone(),
            repo: self.repo.clone(),
            level: self.level,
            title: self.title.clone(),
            url: self.url.clone(),
            author: self.author.clone(),
            created_at: self.created_at,
        }
    }
}

/// A document paired with its embedding, ready for a backend write.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDocument {
    pub document: Document,
    pub vector: Vec<f32>,
}

/// Why a piece of text was left out of the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    TooShort { words: usize },
    OverBudget { tokens: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("no text"),
            Self::TooShort { words } => write!(f, "only {words} words"),
            Self::OverBudget { tokens } => write!(f, "~{tokens} tokens, over the embedding budget"),
        }
    }
}

/// Check a comment body against the word floor and the embedder's token budget.
///
/// Oversized text is rejected outright rather than truncated.
///
/// # Errors
///
/// Returns the reason the comment should be skipped.
pub fn check_comment(body: &str, max_input_tokens: usize) -> Result<(), SkipReason> {
    let words = body.split_whitespace().count();
    if words == 0 {
        return Err(SkipReason::Empty);
    }
    if words < MIN_COMMENT_WORDS {
        return Err(SkipReason::TooShort { words });
    }
    let tokens = estimate_tokens(body);
    if tokens > max_input_tokens {
        return Err(SkipReason::OverBudget { tokens });
    }
    Ok(())
}

/// The administrative placeholder marking a repository as indexed.
#[must_use]
pub fn sentinel_document(repo: &str) -> Document {
    Document {
        key: sentinel_key(repo),
        text: format!("index marker for {repo}"),
        repo: repo.to_owned(),
        author: String::new(),
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        level: Level::Issue,
        title: String::new(),
        url: String::new(),
    }
}

/// Build the issue-level document: title plus body.
///
/// When the body pushes the text over budget the issue is indexed by its title
/// alone, so its key still marks the issue as indexed.
///
/// # Errors
///
/// Returns the skip reason when neither form fits.
pub fn issue_document(
    repo: &str,
    issue: &Issue,
    max_input_tokens: usize,
) -> Result<Document, SkipReason> {
    let title = issue.title.trim();
    let body = issue.body.as_deref().map(str::trim).unwrap_or_default();

    let full = if body.is_empty() {
        title.to_owned()
    } else {
        format!("{title}\n\n{body}")
    };
    if full.trim().is_empty() {
        return Err(SkipReason::Empty);
    }

    let text = if estimate_tokens(&full) <= max_input_tokens {
        full
    } else if !title.is_empty() && estimate_tokens(title) <= max_input_tokens {
        tracing::debug!(
            number = issue.number,
            "issue body over token budget, indexing title only"
        );
        title.to_owned()
    } else {
        return Err(SkipReason::OverBudget {
            tokens: estimate_tokens(&full),
        });
    };

    Ok(Document {
        key: DocKey::issue(issue.number).to_string(),
        text,
        repo: repo.to_owned(),
        author: issue.author.clone(),
        created_at: issue.created_at,
        level: Level::Issue,
        title: issue.title.clone(),
        url: issue.url.clone(),
    })
}

/// Build one document per eligible comment, keyed by its ordinal in `comments`.
///
/// Returns the documents and the number of comments skipped.
#[must_use]
pub fn comment_documents(
    repo: &str,
    issue: &Issue,
    comments: &[Comment],
    max_input_tokens: usize,
) -> (Vec<Document>, usize) {
    let mut docs = Vec::new();
    let mut skipped = 0usize;

    for (ordinal, comment) in comments.iter().enumerate() {
        if let Err(reason) = check_comment(&comment.body, max_input_tokens) {
            if let SkipReason::OverBudget { tokens } = reason {
                tracing::warn!(
                    repo,
                    number = issue.number,
                    ordinal,
                    tokens,
                    "comment exceeds embedding budget, skipped"
                );
            }
            skipped += 1;
            continue;
        }
        docs.push(Document {
            key: DocKey::comment(issue.number, ordinal).to_string(),
            text: comment.body.trim().to_owned(),
            repo: repo.to_owned(),
            author: comment.author.clone(),
            created_at: comment.created_at,
            level: Level::Comment,
            title: issue.title.clone(),
            url: issue.url.clone(),
        });
    }

    (docs, skipped)
}
