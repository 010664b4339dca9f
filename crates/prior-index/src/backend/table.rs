//! Embedded `LanceDB` table backend.
//!
//! All repositories share one table; rows carry their repository and every
//! query filters on it. `bulk_index` recreates the table with overwrite when
//! the repository is its only tenant, otherwise it deletes the repository's
//! rows and adds the new ones. `upsert` is a plain row `add` and does not
//! deduplicate. Cosine distance is converted to similarity as `1 - d`.

use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, RecordBatchReader,
    StringArray,
};
use arrow::datatypes::{DataType, Field, Float32Type, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::connection::Connection;
use lancedb::database::CreateTableMode;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{
    BackendError, BoxFuture, DimensionAction, SearchHit, VectorIndexBackend, check_dimension,
};
use crate::document::{DocumentMetadata, EmbeddedDocument, sentinel_key};

const VECTOR_COLUMN: &str = "vector";
const DISTANCE_COLUMN: &str = "_distance";

pub struct TableBackend {
    connection: Connection,
    table: String,
    dimension: u64,
    width: i32,
    schema: SchemaRef,
}

impl std::fmt::Debug for TableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBackend")
            .field("table", &self.table)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn validate_table_name(table: &str) -> Result<(), BackendError> {
    if table.is_empty()
        || !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || table.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(BackendError::Config(format!(
            "table name {table:?} must be non-empty ASCII letters, digits, or underscores"
        )));
    }
    Ok(())
}

fn table_schema(width: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("repo", DataType::Utf8, false),
        Field::new("key", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width),
            false,
        ),
    ]))
}

/// SQL string literal for a filter expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn repo_filter(repo: &str) -> String {
    format!("repo = {}", quote(repo))
}

fn doc_filter(repo: &str, key: &str) -> String {
    format!("repo = {} AND key = {}", quote(repo), quote(key))
}

/// Map a cosine distance to a similarity where higher is better.
///
/// A zero vector has no direction; the store reports a non-finite distance
/// for it, which scores as orthogonal.
#[must_use]
pub fn distance_to_score(distance: f32) -> f32 {
    if distance.is_finite() {
        1.0 - distance
    } else {
        0.0
    }
}

impl TableBackend {
    /// Connect to the database directory at `path`. `:memory:` opens a
    /// private in-process store.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the store cannot be opened.
    pub async fn open(path: &str, table: &str, dimension: u64) -> Result<Self, BackendError> {
        validate_table_name(table)?;
        let width = i32::try_from(dimension)
            .map_err(|_| BackendError::Config(format!("dimension {dimension} out of range")))?;

        let uri = if path == ":memory:" {
            format!("memory://prior-{}", uuid::Uuid::new_v4())
        } else {
            path.to_owned()
        };
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| BackendError::Connection(format!("{path}: {e}")))?;

        Ok(Self {
            connection,
            table: table.to_owned(),
            dimension,
            width,
            schema: table_schema(width),
        })
    }

    async fn open_table(&self) -> Result<Option<lancedb::Table>, BackendError> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        if !names.iter().any(|n| n == &self.table) {
            return Ok(None);
        }
        let table = self
            .connection
            .open_table(&self.table)
            .execute()
            .await
            .map_err(|e| BackendError::Collection(e.to_string()))?;
        Ok(Some(table))
    }

    async fn stored_dimension(&self) -> Result<Option<u64>, BackendError> {
        let Some(table) = self.open_table().await? else {
            return Ok(None);
        };
        let schema = table
            .schema()
            .await
            .map_err(|e| BackendError::Collection(e.to_string()))?;
        let field = schema
            .field_with_name(VECTOR_COLUMN)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        match field.data_type() {
            DataType::FixedSizeList(_, width) => u64::try_from(*width)
                .map(Some)
                .map_err(|_| BackendError::Serialization(format!("stored dimension {width}"))),
            other => Err(BackendError::Serialization(format!(
                "{VECTOR_COLUMN} column has type {other}"
            ))),
        }
    }

    fn to_batch(&self, repo: &str, docs: &[EmbeddedDocument]) -> Result<RecordBatch, BackendError> {
        let mut metadata = Vec::with_capacity(docs.len());
        for doc in docs {
            if doc.vector.len() as u64 != self.dimension {
                return Err(BackendError::Upsert(format!(
                    "vector for {} has {} dimensions, expected {}",
                    doc.document.key,
                    doc.vector.len(),
                    self.dimension
                )));
            }
            metadata.push(
                serde_json::to_string(&doc.document.metadata())
                    .map_err(|e| BackendError::Serialization(e.to_string()))?,
            );
        }

        let repos = StringArray::from(vec![repo; docs.len()]);
        let keys = StringArray::from_iter_values(docs.iter().map(|d| d.document.key.as_str()));
        let metadata = StringArray::from(metadata);
        let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            docs.iter()
                .map(|d| Some(d.vector.iter().copied().map(Some).collect::<Vec<_>>())),
            self.width,
        );
        RecordBatch::try_new(
            Arc::clone(&self.schema),
            vec![
                Arc::new(repos),
                Arc::new(keys),
                Arc::new(metadata),
                Arc::new(vectors),
            ],
        )
        .map_err(|e| BackendError::Serialization(e.to_string()))
    }

    fn reader(&self, batch: RecordBatch) -> Box<dyn RecordBatchReader + Send> {
        Box::new(RecordBatchIterator::new(
            vec![Ok(batch)],
            Arc::clone(&self.schema),
        ))
    }

    async fn overwrite(&self, batch: RecordBatch) -> Result<(), BackendError> {
        self.connection
            .create_table(&self.table, self.reader(batch))
            .mode(CreateTableMode::Overwrite)
            .execute()
            .await
            .map_err(|e| BackendError::Collection(e.to_string()))?;
        Ok(())
    }

    async fn add(&self, table: &lancedb::Table, batch: RecordBatch) -> Result<(), BackendError> {
        table
            .add(self.reader(batch))
            .execute()
            .await
            .map_err(|e| BackendError::Upsert(e.to_string()))?;
        Ok(())
    }
}

impl VectorIndexBackend for TableBackend {
    fn name(&self) -> &'static str {
        "table"
    }

    fn ensure_compatible(&self, force_rebuild: bool) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let stored = self.stored_dimension().await?;
            if check_dimension(&self.table, stored, self.dimension, force_rebuild)?
                == DimensionAction::Recreate
            {
                tracing::warn!(
                    table = %self.table,
                    stored,
                    configured = self.dimension,
                    "recreating table with mismatched vector dimension"
                );
                self.connection
                    .create_empty_table(&self.table, Arc::clone(&self.schema))
                    .mode(CreateTableMode::Overwrite)
                    .execute()
                    .await
                    .map_err(|e| BackendError::Collection(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn contains(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let filter = doc_filter(repo, key);
        Box::pin(async move {
            let Some(table) = self.open_table().await? else {
                return Ok(false);
            };
            let count = table
                .count_rows(Some(filter))
                .await
                .map_err(|e| BackendError::Probe(e.to_string()))?;
            Ok(count > 0)
        })
    }

    fn bulk_index(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            let batch = self.to_batch(&repo, &docs)?;
            let count = docs.len();
            let shared = match self.open_table().await? {
                Some(table) => {
                    let others = table
                        .count_rows(Some(format!("repo != {}", quote(&repo))))
                        .await
                        .map_err(|e| BackendError::Probe(e.to_string()))?;
                    (others > 0).then_some(table)
                }
                None => None,
            };

            if let Some(table) = shared {
                table
                    .delete(&repo_filter(&repo))
                    .await
                    .map_err(|e| BackendError::Delete(e.to_string()))?;
                self.add(&table, batch).await?;
                tracing::debug!(%repo, count, "repository rows replaced");
            } else {
                self.overwrite(batch).await?;
                tracing::debug!(%repo, count, "table overwritten");
            }
            Ok(())
        })
    }

    fn upsert(
        &self,
        docs: Vec<EmbeddedDocument>,
        repo: &str,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        let repo = repo.to_owned();
        Box::pin(async move {
            if docs.is_empty() {
                return Ok(());
            }
            let batch = self.to_batch(&repo, &docs)?;
            match self.open_table().await? {
                Some(table) => self.add(&table, batch).await,
                None => {
                    self.connection
                        .create_table(&self.table, self.reader(batch))
                        .execute()
                        .await
                        .map_err(|e| BackendError::Collection(e.to_string()))?;
                    Ok(())
                }
            }
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        k: usize,
        repo: &str,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, BackendError>> {
        let filter = format!(
            "{} AND key != {}",
            repo_filter(repo),
            quote(&sentinel_key(repo))
        );
        Box::pin(async move {
            if k == 0 {
                return Ok(Vec::new());
            }
            let Some(table) = self.open_table().await? else {
                return Ok(Vec::new());
            };
            let batches: Vec<RecordBatch> = table
                .query()
                .nearest_to(vector.as_slice())
                .map_err(|e| BackendError::Search(e.to_string()))?
                .distance_type(DistanceType::Cosine)
                .only_if(filter)
                .limit(k)
                .execute()
                .await
                .map_err(|e| BackendError::Search(e.to_string()))?
                .try_collect()
                .await
                .map_err(|e| BackendError::Search(e.to_string()))?;

            let mut hits = Vec::new();
            for batch in &batches {
                let metadata = batch
                    .column_by_name("metadata")
                    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                    .ok_or_else(|| BackendError::Serialization("missing metadata column".into()))?;
                let distance = batch
                    .column_by_name(DISTANCE_COLUMN)
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .ok_or_else(|| BackendError::Serialization("missing distance column".into()))?;
                for i in 0..batch.num_rows() {
                    let metadata: DocumentMetadata = serde_json::from_str(metadata.value(i))
                        .map_err(|e| BackendError::Serialization(e.to_string()))?;
                    let distance = if distance.is_null(i) {
                        f32::NAN
                    } else {
                        distance.value(i)
                    };
                    hits.push(SearchHit {
                        score: distance_to_score(distance),
                        metadata,
                    });
                }
            }
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            Ok(hits)
        })
    }

    fn delete(&self, repo: &str, key: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let filter = doc_filter(repo, key);
        Box::pin(async move {
            let Some(table) = self.open_table().await? else {
                return Ok(());
            };
            table
                .delete(&filter)
                .await
                .map_err(|e| BackendError::Delete(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::document::{Document, Level, sentinel_document};
    use crate::error::ErrorKind;

    fn embedded(repo: &str, key: &str, vector: Vec<f32>) -> EmbeddedDocument {
        EmbeddedDocument {
            document: Document {
                key: key.into(),
                text: "text".into(),
                repo: repo.into(),
                author: "a".into(),
                created_at: DateTime::<Utc>::UNIX_EPOCH,
                level: Level::Issue,
                title: format!("title of {key}"),
                url: format!("https://example.com/{key}"),
            },
            vector,
        }
    }

    async fn memory_table(dim: u64) -> TableBackend {
        TableBackend::open(":memory:", "issues", dim).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        for name in ["", "drop table", "x;y", "1abc"] {
            let err = TableBackend::open(":memory:", name, 2).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{name}");
        }
    }

    #[tokio::test]
    async fn empty_store_answers_probes() {
        let store = memory_table(2).await;
        assert!(!store.exists("acme/w").await.unwrap());
        assert!(store.search(vec![1.0, 0.0], 5, "acme/w").await.unwrap().is_empty());
        store.delete("acme/w", "issue_1.issue").await.unwrap();
        store.ensure_compatible(false).await.unwrap();
    }

    #[tokio::test]
    async fn exists_after_sentinel_written() {
        let store = memory_table(2).await;
        store
            .bulk_index(
                vec![EmbeddedDocument {
                    document: sentinel_document("acme/w"),
                    vector: vec![0.0, 0.0],
                }],
                "acme/w",
            )
            .await
            .unwrap();
        assert!(store.exists("acme/w").await.unwrap());
        assert!(!store.exists("acme/other").await.unwrap());
    }

    #[tokio::test]
    async fn sole_repo_bulk_index_overwrites_table() {
        let store = memory_table(2).await;
        store
            .bulk_index(vec![embedded("a", "issue_1.issue", vec![1.0, 0.0])], "a")
            .await
            .unwrap();
        store
            .bulk_index(vec![embedded("a", "issue_2.issue", vec![1.0, 0.0])], "a")
            .await
            .unwrap();
        assert!(!store.contains("a", "issue_1.issue").await.unwrap());
        assert!(store.contains("a", "issue_2.issue").await.unwrap());
    }

    #[tokio::test]
    async fn bulk_index_overwrites_only_its_repo() {
        let store = memory_table(2).await;
        store
            .bulk_index(vec![embedded("a", "issue_1.issue", vec![1.0, 0.0])], "a")
            .await
            .unwrap();
        store
            .bulk_index(vec![embedded("b", "issue_1.issue", vec![1.0, 0.0])], "b")
            .await
            .unwrap();
        store
            .bulk_index(vec![embedded("a", "issue_2.issue", vec![1.0, 0.0])], "a")
            .await
            .unwrap();
        assert!(!store.contains("a", "issue_1.issue").await.unwrap());
        assert!(store.contains("a", "issue_2.issue").await.unwrap());
        assert!(store.contains("b", "issue_1.issue").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_creates_table_then_appends() {
        let store = memory_table(2).await;
        let doc = embedded("a", "issue_1.issue", vec![1.0, 0.0]);
        store.upsert(vec![doc.clone()], "a").await.unwrap();
        store.upsert(vec![doc], "a").await.unwrap();
        store.upsert(Vec::new(), "a").await.unwrap();
        let hits = store.search(vec![1.0, 0.0], 10, "a").await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_width() {
        let store = memory_table(2).await;
        let err = store
            .upsert(vec![embedded("a", "issue_1.issue", vec![1.0, 0.0, 0.0])], "a")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[tokio::test]
    async fn search_scores_are_cosine_similarity() {
        let store = memory_table(2).await;
        store
            .bulk_index(
                vec![
                    embedded("a", "issue_1.issue", vec![2.0, 0.0]),
                    embedded("a", "issue_2.issue", vec![1.0, 2.0]),
                    embedded("a", "issue_3.issue", vec![0.0, 0.0]),
                    EmbeddedDocument {
                        document: sentinel_document("a"),
                        vector: vec![1.0, 0.0],
                    },
                ],
                "a",
            )
            .await
            .unwrap();
        let hits = store.search(vec![1.0, 0.0], 5, "a").await.unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.metadata.key.as_str()).collect();
        assert_eq!(keys, ["issue_1.issue", "issue_2.issue", "issue_3.issue"]);
        assert!((hits[0].score - 1.0).abs() < 1e-4);
        assert!((hits[1].score - 1.0 / 5f32.sqrt()).abs() < 1e-4);
        // a zero-filled document never outranks a real one
        assert!(hits[2].score.abs() < 1e-4);
        assert_eq!(hits[0].metadata.title, "title of issue_1.issue");
    }

    #[tokio::test]
    async fn search_respects_k_and_repo() {
        let store = memory_table(2).await;
        store
            .upsert(
                vec![
                    embedded("a", "issue_1.issue", vec![1.0, 0.0]),
                    embedded("a", "issue_2.issue", vec![0.5, 0.5]),
                ],
                "a",
            )
            .await
            .unwrap();
        store
            .upsert(vec![embedded("b", "issue_9.issue", vec![1.0, 0.0])], "b")
            .await
            .unwrap();
        let hits = store.search(vec![1.0, 0.0], 1, "a").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.key, "issue_1.issue");
        assert!(store.search(vec![1.0, 0.0], 0, "a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quotes_in_repo_names_are_escaped() {
        let store = memory_table(2).await;
        store
            .upsert(vec![embedded("o'brien/x", "issue_1.issue", vec![1.0, 0.0])], "o'brien/x")
            .await
            .unwrap();
        assert!(store.contains("o'brien/x", "issue_1.issue").await.unwrap());
    }

    #[tokio::test]
    async fn dimension_mismatch_fatal_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let path = path.to_str().unwrap();

        let small = TableBackend::open(path, "issues", 2).await.unwrap();
        small
            .upsert(vec![embedded("a", "issue_1.issue", vec![1.0, 0.0])], "a")
            .await
            .unwrap();
        drop(small);

        let large = TableBackend::open(path, "issues", 3).await.unwrap();
        let err = large.ensure_compatible(false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        large.ensure_compatible(true).await.unwrap();
        assert!(!large.contains("a", "issue_1.issue").await.unwrap());
        large.ensure_compatible(false).await.unwrap();
        large
            .upsert(vec![embedded("a", "issue_1.issue", vec![1.0, 0.0, 0.0])], "a")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_single_document() {
        let store = memory_table(2).await;
        store
            .upsert(
                vec![
                    embedded("a", "issue_1.issue", vec![1.0, 0.0]),
                    embedded("a", "issue_1.comment_0", vec![1.0, 0.0]),
                ],
                "a",
            )
            .await
            .unwrap();
        store.delete("a", "issue_1.comment_0").await.unwrap();
        assert!(store.contains("a", "issue_1.issue").await.unwrap());
        assert!(!store.contains("a", "issue_1.comment_0").await.unwrap());
    }

    #[test]
    fn score_mapping() {
        assert!((distance_to_score(0.0) - 1.0).abs() < f32::EPSILON);
        assert!((distance_to_score(1.0)).abs() < f32::EPSILON);
        assert!((distance_to_score(f32::NAN)).abs() < f32::EPSILON);
    }

    #[test]
    fn filter_literals_are_quoted() {
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(doc_filter("a/b", "k"), "repo = 'a/b' AND key = 'k'");
    }
}
