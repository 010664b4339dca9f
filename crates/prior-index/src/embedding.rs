//! Corpus embedding with graceful degradation.
//!
//! A failed batch is retried one document at a time; a document that still
//! fails is stored with a zero vector so one bad input never sinks a run.
//! Credential errors and a run where nothing at all could be embedded are
//! still errors.

use prior_embed::{EmbedError, Embedder};

use crate::document::{Document, EmbeddedDocument};

pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Default)]
pub struct EmbedOutcome {
    pub documents: Vec<EmbeddedDocument>,
    /// Documents stored with a zero vector.
    pub zero_filled: usize,
    /// Batches that had to be retried item by item.
    pub batch_fallbacks: usize,
}

/// Embed `docs` in order, `batch_size` texts per request.
///
/// # Errors
///
/// Returns the embedder's error when credentials are rejected, or the last
/// error seen when every document failed.
pub async fn embed_documents<E: Embedder>(
    embedder: &E,
    docs: Vec<Document>,
    batch_size: usize,
) -> Result<EmbedOutcome, EmbedError> {
    let dimension = embedder.dimension();
    let total = docs.len();
    let mut outcome = EmbedOutcome {
        documents: Vec::with_capacity(total),
        ..EmbedOutcome::default()
    };
    let mut last_error = None;

    let mut pending = docs.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<Document> = pending.by_ref().take(batch_size.max(1)).collect();
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();

        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for (document, vector) in batch.into_iter().zip(vectors) {
                    let vector = accept_or_zero(&document, vector, dimension, &mut outcome);
                    outcome.documents.push(EmbeddedDocument { document, vector });
                }
            }
            Ok(vectors) => {
                tracing::warn!(
                    expected = batch.len(),
                    actual = vectors.len(),
                    "embedding batch size mismatch, retrying per document"
                );
                outcome.batch_fallbacks += 1;
                embed_one_by_one(embedder, batch, &mut outcome, &mut last_error).await?;
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::warn!("embedding batch of {} failed: {e:#}", batch.len());
                outcome.batch_fallbacks += 1;
                last_error = Some(e);
                embed_one_by_one(embedder, batch, &mut outcome, &mut last_error).await?;
            }
        }
    }

    if total > 0 && outcome.zero_filled == total {
        return Err(last_error.unwrap_or_else(|| {
            EmbedError::Other(format!("no usable embeddings for {total} documents"))
        }));
    }
    if outcome.zero_filled > 0 {
        tracing::warn!(
            zero_filled = outcome.zero_filled,
            total,
            "some documents were indexed with zero vectors"
        );
    }
    Ok(outcome)
}

async fn embed_one_by_one<E: Embedder>(
    embedder: &E,
    batch: Vec<Document>,
    outcome: &mut EmbedOutcome,
    last_error: &mut Option<EmbedError>,
) -> Result<(), EmbedError> {
    let dimension = embedder.dimension();
    for document in batch {
        let result = embedder.embed(std::slice::from_ref(&document.text)).await;
        let vector = match result {
            Ok(mut vectors) if vectors.len() == 1 => {
                let vector = vectors.swap_remove(0);
                accept_or_zero(&document, vector, dimension, outcome)
            }
            Ok(vectors) => {
                tracing::warn!(key = %document.key, returned = vectors.len(), "unexpected embedding count");
                outcome.zero_filled += 1;
                vec![0.0; dimension]
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::warn!(key = %document.key, "embedding failed, using zero vector: {e:#}");
                *last_error = Some(e);
                outcome.zero_filled += 1;
                vec![0.0; dimension]
            }
        };
        outcome.documents.push(EmbeddedDocument { document, vector });
    }
    Ok(())
}

fn accept_or_zero(
    document: &Document,
    vector: Vec<f32>,
    dimension: usize,
    outcome: &mut EmbedOutcome,
) -> Vec<f32> {
    if vector.len() == dimension {
        return vector;
    }
    tracing::warn!(
        key = %document.key,
        expected = dimension,
        actual = vector.len(),
        "embedding has wrong dimension, using zero vector"
    );
    outcome.zero_filled += 1;
    vec![0.0; dimension]
}
