//! Qdrant collection backend.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, value::Kind, vectors_config,
};

use super::{
    BackendError, BoxFuture, DimensionAction, SearchHit, VectorIndexBackend, check_dimension,
    point_id,
};
use crate::document::{DocumentMetadata, EmbeddedDocument, sentinel_key};

const INDEXED_FIELDS: [&str; 2] = ["repo", "key"];

/// One cosine-distance collection shared by every repository.
#[derive(Clone)]
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    dimension: u64,
}

impl std::fmt::Debug for QdrantBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantBackend")
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn repo_filter(repo: &str) -> Filter {
    Filter::must([Condition::matches("repo", repo.to_owned())])
}

fn key_filter(repo: &str, key: &str) -> Filter {
    Filter::must([
        Condition::matches("repo", repo.to_owned()),
        Condition::matches("key", key.to_owned()),
    ])
}

fn search_filter(repo: &str) -> Filter {
    Filter {
        must: vec![Condition::matches("repo", repo.to_owned())],
        must_not: vec![Condition::matches("key", sentinel_key(repo))],
        ..Filter::default()
    }
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json_val = match v.kind? {
                Kind::StringValue(s) => serde_json::Value::String(s),
                Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
                Kind::DoubleValue(d) => {
                    serde_json::Number::from_f64(d).map(serde_json::Value::Number)?
                }
                Kind::BoolValue(b) => serde_json::Value::Bool(b),
                _ => return None,
            };
            Some((k, json_val))
        })
        .collect()
}

impl QdrantBackend {
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        dimension: u64,
    ) -> Result<Self, BackendError> {
        if collection.is_empty() {
            return Err(BackendError::Config(
                "qdrant collection name must not be empty".into(),
            ));
        }
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.to_owned(),
            dimension,
        })
    }

    async fn collection_exists(&self) -> Result<bool, BackendError> {
        self.client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))
    }

    async fn stored_dimension(&self) -> Result<Option<u64>, BackendError> {
        if !self.collection_exists().await? {
            return Ok(None);
        }
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| BackendError::Collection(e.to_string()))?;
        let config = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);
        match config {
            Some(vectors_config::Config::Params(params)) => Ok(Some(params.size)),
            Some(vectors_config::Config::ParamsMap(_)) => Err(BackendError::Collection(format!(
                "collection {} uses named vectors",
                self.collection
            ))),
            None => Err(BackendError::Collection(format!(
                "collection {} reported no vector parameters",
                self.collection
            ))),
        }
    }

    async fn create_collection(&self) -> Result<(), BackendError> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dimension, Distance::Cosine)),
            )
            .await
            .map_err(|e| BackendError::Collection(e.to_string()))?;
        for field in INDEXED_FIELDS {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| BackendError::Collection(e.to_string()))?;
        }
        tracing::info!(collection = %self.collection, dimension = self.dimension, "qdrant collection created");
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), BackendError> {
        if self.collection_exists().await? {
            return Ok(());
        }
        self.create_collection().await
    }

    async fn write(&self, docs: Vec<EmbeddedDocument>, repo: &str) -> Result<(), BackendError> {
        if docs.is_empty() {
            return Ok(());
        }
        let mut points = Vec::with_capacity(docs.len());
        for doc in docs {
            let payload = doc
                .document
                .metadata()
                .to_payload()
                .map_err(|e| BackendError::Serialization(e.to_string()))?;
            let payload: HashMap<String, qdrant_client::qdrant::Value> =
                serde_json::from_value(serde_json::Value::Object(payload))
                    .map_err(|e| BackendError::Serialization(e.to_string()))?;
            points.push(PointStruct::new(
                point_id(repo, &doc.document.key),
                doc.vector,
                payload,
            ));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| BackendError::Upsert(e.to_string()))?;
        Ok(())
    }
}

impl VectorIndexBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    fn ensure_compatible(&self, force_rebuild: bool) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let stored = self.stored_dimension().await?;
            if stored.is_none() {
                return self.create_collection().await;
            }
            if check_dimension(&self.collection, stored, self.dimension, force_rebuild)?
                == DimensionAction::Recreate
            {
                tracing::warn!(
                    collection = %self.collection,
                    stored,
                    configured = self.dimension,
                    "recreating qdrant collection with new vector size"
                );
                self.client
                    .delete_collection(&self.collection)
                    .await
                    .map_err(|e| BackendError::Collection(e.to_string()))?;
                self.create_collection().await?;
            }
            Ok(())
        })
    }

    fn contains(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let filter = key_filter(repo, key);
        Box::pin(async move {
            if !self.collection_exists().await? {
                return Ok(false);
            }
            let response = self
                .client
                .count(
                    CountPointsBuilder::new(&self.collection)
                        .filter(filter)
                        .exact(true),
                )
                .await
                .map_err(|e| BackendError::Probe(e.to_string()))?;
            Ok(response.result.is_some_and(|r| r.count > 0))
        })
    }

    fn bulk_index(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            self.ensure_collection().await?;
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(repo_filter(&repo))
                        .wait(true),
                )
                .await
                .map_err(|e| BackendError::Delete(e.to_string()))?;
            self.write(docs, &repo).await
        })
    }

    fn upsert(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            self.ensure_collection().await?;
            self.write(docs, &repo).await
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        repo: &str,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, BackendError>> {
        let filter = search_filter(repo);
        Box::pin(async move {
            if !self.collection_exists().await? {
                return Ok(Vec::new());
            }
            let response = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&self.collection, vector, k as u64)
                        .filter(filter)
                        .with_payload(true),
                )
                .await
                .map_err(|e| BackendError::Search(e.to_string()))?;

            response
                .result
                .into_iter()
                .map(|point| {
                    let metadata = DocumentMetadata::from_payload(payload_to_json(point.payload))
                        .map_err(|e| BackendError::Serialization(e.to_string()))?;
                    Ok(SearchHit {
                        metadata,
                        score: point.score,
                    })
                })
                .collect()
        })
    }

    fn delete(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let id = PointId::from(point_id(repo, key));
        Box::pin(async move {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsIdsList { ids: vec![id] })
                        .wait(true),
                )
                .await
                .map_err(|e| BackendError::Delete(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_collection_name_rejected() {
        let err = QdrantBackend::new("http://localhost:6334", None, "", 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn search_filter_excludes_sentinel() {
        let f = search_filter("acme/w");
        assert_eq!(f.must.len(), 1);
        assert_eq!(f.must_not.len(), 1);
    }

    #[test]
    fn payload_converts_back_to_metadata() {
        let meta = DocumentMetadata {
            key: "issue_4.comment_1".into(),
            repo: "acme/w".into(),
            level: crate::document::Level::Comment,
            title: "Crash".into(),
            url: "https://github.com/acme/w/issues/4".into(),
            author: "octocat".into(),
            created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        };
        let payload: HashMap<String, qdrant_client::qdrant::Value> =
            serde_json::from_value(serde_json::Value::Object(meta.to_payload().unwrap())).unwrap();
        let back = DocumentMetadata::from_payload(payload_to_json(payload)).unwrap();
        assert_eq!(back, meta);
    }
}
