//! Test-only mock embedder.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::EmbedError;
use crate::provider::Embedder;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    pub max_input_tokens: usize,
    /// Fixed vectors for specific texts; anything else gets `default_vector`.
    pub vectors: HashMap<String, Vec<f32>>,
    pub default_vector: Vec<f32>,
    /// Texts whose embedding always fails, failing any batch that contains them.
    pub failing_texts: HashSet<String>,
    pub reject_credentials: bool,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_input_tokens: 8191,
            vectors: HashMap::new(),
            default_vector: vec![1.0; dimension],
            failing_texts: HashSet::new(),
            reject_credentials: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    #[must_use]
    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.failing_texts.insert(text.into());
        self
    }

    #[must_use]
    pub fn with_max_input_tokens(mut self, tokens: usize) -> Self {
        self.max_input_tokens = tokens;
        self
    }

    #[must_use]
    pub fn unauthorized(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Sizes of every batch passed to `embed`, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.lock().unwrap().push(texts.len());
        if self.reject_credentials {
            return Err(EmbedError::Unauthorized {
                provider: "mock",
                status: 401,
            });
        }
        if let Some(bad) = texts.iter().find(|t| self.failing_texts.contains(*t)) {
            return Err(EmbedError::Other(format!("mock embedding failure for {bad:?}")));
        }
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| self.default_vector.clone())
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
