#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;

use crate::error::EmbedError;
use crate::provider::Embedder;

/// Generates a match over all `AnyEmbedder` variants, binding the inner embedder
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$e:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::OpenAi($e) => $expr,
            AnyEmbedder::Ollama($e) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($e) => $expr,
        }
    };
}

/// Embedder selected from configuration at startup.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    OpenAi(OpenAiEmbedder),
    Ollama(OllamaEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl Embedder for AnyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        delegate_embedder!(self, |e| e.embed(texts).await)
    }

    fn dimension(&self) -> usize {
        delegate_embedder!(self, |e| e.dimension())
    }

    fn max_input_tokens(&self) -> usize {
        delegate_embedder!(self, |e| e.max_input_tokens())
    }

    fn model(&self) -> &str {
        delegate_embedder!(self, |e| e.model())
    }

    fn name(&self) -> &'static str {
        delegate_embedder!(self, |e| e.name())
    }
}
