//! Hosted namespace store over the Pinecone data-plane REST API.
//!
//! Vector ids are `{repo}#{key}` so a repository's documents can be listed by
//! prefix; the index itself is provisioned out of band.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{BackendError, BoxFuture, SearchHit, VectorIndexBackend};
use crate::document::{DocumentMetadata, EmbeddedDocument, sentinel_key};

const API_VERSION: &str = "2025-01";
const DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct PineconeOptions {
    /// Data-plane host of the index, e.g. `https://issues-abc123.svc.pinecone.io`.
    pub host: String,
    pub namespace: String,
    pub batch_size: usize,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for PineconeOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            namespace: String::new(),
            batch_size: 100,
            poll_attempts: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct PineconeBackend {
    client: reqwest::Client,
    api_key: String,
    options: PineconeOptions,
    dimension: u64,
}

impl fmt::Debug for PineconeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PineconeBackend")
            .field("api_key", &"<redacted>")
            .field("host", &self.options.host)
            .field("namespace", &self.options.namespace)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn vector_id(repo: &str, key: &str) -> String {
    format!("{repo}#{key}")
}

impl PineconeBackend {
    /// # Errors
    ///
    /// Returns an error if the host is not an absolute URL or the batch size is zero.
    pub fn new(
        api_key: String,
        mut options: PineconeOptions,
        dimension: u64,
    ) -> Result<Self, BackendError> {
        while options.host.ends_with('/') {
            options.host.pop();
        }
        Url::parse(&options.host)
            .map_err(|e| BackendError::Config(format!("pinecone host {:?}: {e}", options.host)))?;
        if options.batch_size == 0 {
            return Err(BackendError::Config(
                "pinecone batch_size must be positive".into(),
            ));
        }
        Ok(Self {
            client: prior_embed::http::default_client(),
            api_key,
            options,
            dimension,
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        Url::parse(&format!("{}{path}", self.options.host))
            .map_err(|e| BackendError::Config(e.to_string()))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(
        &self,
        req: RequestBuilder,
        err: fn(String) -> BackendError,
    ) -> Result<String, BackendError> {
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Connection(format!(
                "pinecone rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            tracing::error!("Pinecone API error {status}: {text}");
            return Err(err(format!("pinecone returned {status}")));
        }
        Ok(text)
    }

    async fn fetch_present(&self, id: &str) -> Result<bool, BackendError> {
        let mut url = self.url("/vectors/fetch")?;
        url.query_pairs_mut()
            .append_pair("ids", id)
            .append_pair("namespace", &self.options.namespace);
        let text = self
            .send(self.client.get(url), BackendError::Probe)
            .await?;
        let resp: FetchResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Probe(e.to_string()))?;
        Ok(resp.vectors.contains_key(id))
    }

    async fn list_ids(&self, repo: &str) -> Result<Vec<String>, BackendError> {
        let prefix = vector_id(repo, "");
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = self.url("/vectors/list")?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs
                    .append_pair("prefix", &prefix)
                    .append_pair("namespace", &self.options.namespace);
                if let Some(t) = &token {
                    pairs.append_pair("paginationToken", t);
                }
            }
            let text = self
                .send(self.client.get(url), BackendError::Probe)
                .await?;
            let page: ListResponse =
                serde_json::from_str(&text).map_err(|e| BackendError::Probe(e.to_string()))?;
            ids.extend(page.vectors.into_iter().map(|v| v.id));
            match page.pagination.and_then(|p| p.next) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), BackendError> {
        for chunk in ids.chunks(DELETE_BATCH) {
            let body = json!({ "ids": chunk, "namespace": self.options.namespace });
            self.send(
                self.client.post(self.url("/vectors/delete")?).json(&body),
                BackendError::Delete,
            )
            .await?;
        }
        Ok(())
    }

    async fn write(&self, docs: Vec<EmbeddedDocument>, repo: &str) -> Result<(), BackendError> {
        let Some(last) = docs.last() else {
            return Ok(());
        };
        let sentinel = sentinel_key(repo);
        let marker_key = if docs.iter().any(|d| d.document.key == sentinel) {
            sentinel
        } else {
            last.document.key.clone()
        };

        let mut vectors = Vec::with_capacity(docs.len());
        for doc in docs {
            if doc.vector.len() as u64 != self.dimension {
                return Err(BackendError::Upsert(format!(
                    "vector for {} has {} dimensions, expected {}",
                    doc.document.key,
                    doc.vector.len(),
                    self.dimension
                )));
            }
            let metadata = doc
                .document
                .metadata()
                .to_payload()
                .map_err(|e| BackendError::Serialization(e.to_string()))?;
            vectors.push(UpsertVector {
                id: vector_id(repo, &doc.document.key),
                values: doc.vector,
                metadata,
            });
        }

        for batch in vectors.chunks(self.options.batch_size) {
            let body = UpsertRequest {
                vectors: batch,
                namespace: &self.options.namespace,
            };
            self.send(
                self.client.post(self.url("/vectors/upsert")?).json(&body),
                BackendError::Upsert,
            )
            .await?;
            tracing::debug!(repo, count = batch.len(), "pinecone batch upserted");
        }

        self.wait_visible(repo, &vector_id(repo, &marker_key)).await
    }

    /// Poll until `id` is fetchable; writes are only eventually visible.
    async fn wait_visible(&self, repo: &str, id: &str) -> Result<(), BackendError> {
        for attempt in 1..=self.options.poll_attempts {
            if self.fetch_present(id).await? {
                tracing::debug!(repo, attempt, "pinecone write visible");
                return Ok(());
            }
            if attempt < self.options.poll_attempts {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }
        Err(BackendError::NotReady {
            target: format!("pinecone index {}", self.options.host),
            attempts: self.options.poll_attempts,
        })
    }
}

impl VectorIndexBackend for PineconeBackend {
    fn name(&self) -> &'static str {
        "pinecone"
    }

    /// The index is provisioned elsewhere, so a mismatch is fatal even when a
    /// rebuild is requested.
    fn ensure_compatible(&self, force_rebuild: bool) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let text = self
                .send(
                    self.client
                        .post(self.url("/describe_index_stats")?)
                        .json(&json!({})),
                    BackendError::Collection,
                )
                .await?;
            let stats: IndexStats =
                serde_json::from_str(&text).map_err(|e| BackendError::Collection(e.to_string()))?;
            if stats.dimension != self.dimension {
                if force_rebuild {
                    tracing::warn!("pinecone indexes cannot be recreated from here");
                }
                return Err(BackendError::DimensionMismatch {
                    target: format!("pinecone index {}", self.options.host),
                    stored: stats.dimension,
                    configured: self.dimension,
                });
            }
            Ok(())
        })
    }

    fn contains(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let id = vector_id(repo, key);
        Box::pin(async move { self.fetch_present(&id).await })
    }

    fn bulk_index(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            let keep: std::collections::HashSet<String> = docs
                .iter()
                .map(|d| vector_id(&repo, &d.document.key))
                .collect();
            let stale: Vec<String> = self
                .list_ids(&repo)
                .await?
                .into_iter()
                .filter(|id| !keep.contains(id))
                .collect();
            if !stale.is_empty() {
                tracing::info!(%repo, count = stale.len(), "removing stale pinecone vectors");
                self.delete_ids(&stale).await?;
            }
            self.write(docs, &repo).await
        })
    }

    fn upsert(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move { self.write(docs, &repo).await })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        repo: &str,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            let body = json!({
                "vector": vector,
                "topK": k,
                "namespace": self.options.namespace,
                "includeMetadata": true,
                "includeValues": false,
                "filter": {
                    "repo": { "$eq": repo },
                    "key": { "$ne": sentinel_key(&repo) },
                },
            });
            let text = self
                .send(
                    self.client.post(self.url("/query")?).json(&body),
                    BackendError::Search,
                )
                .await?;
            let resp: QueryResponse =
                serde_json::from_str(&text).map_err(|e| BackendError::Search(e.to_string()))?;

            let mut hits = Vec::with_capacity(resp.matches.len());
            for m in resp.matches {
                let Some(metadata) = m.metadata else {
                    tracing::warn!(id = %m.id, "pinecone match without metadata");
                    continue;
                };
                let metadata = DocumentMetadata::from_payload(metadata)
                    .map_err(|e| BackendError::Serialization(e.to_string()))?;
                hits.push(SearchHit {
                    metadata,
                    score: m.score,
                });
            }
            Ok(hits)
        })
    }

    fn delete(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let id = vector_id(repo, key);
        Box::pin(async move { self.delete_ids(&[id]).await })
    }
}

#[derive(Serialize)]
struct UpsertVector {
    id: String,
    values: Vec<f32>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [UpsertVector],
    namespace: &'a str,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Deserialize)]
struct IndexStats {
    dimension: u64,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}
