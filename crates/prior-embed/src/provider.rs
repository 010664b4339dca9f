use std::future::Future;

use crate::error::EmbedError;

/// Rough token estimate used for input budgeting (about four characters per token).
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable, rejects the request, or
    /// returns vectors that do not match [`Embedder::dimension`].
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Largest single input, in estimated tokens, the model accepts.
    fn max_input_tokens(&self) -> usize;

    fn model(&self) -> &str;

    fn name(&self) -> &'static str;
}

/// Verify a provider response has one vector per input, each of the configured length.
///
/// # Errors
///
/// Returns [`EmbedError::CountMismatch`] or [`EmbedError::Dimension`].
pub fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbedError> {
    if vectors.len() != expected_count {
        return Err(EmbedError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbedError::Dimension {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_ascii() {
        assert_eq!(estimate_tokens("Hello, world!"), 3);
    }

    #[test]
    fn estimate_tokens_unicode() {
        assert_eq!(estimate_tokens("Привет мир"), 2);
    }

    #[test]
    fn check_batch_accepts_matching() {
        let vectors = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(check_batch(&vectors, 2, 3).is_ok());
    }

    #[test]
    fn check_batch_rejects_short_response() {
        let vectors = vec![vec![0.0; 3]];
        assert!(matches!(
            check_batch(&vectors, 2, 3),
            Err(EmbedError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn check_batch_rejects_wrong_dimension() {
        let vectors = vec![vec![0.0; 3], vec![0.0; 5]];
        assert!(matches!(
            check_batch(&vectors, 2, 3),
            Err(EmbedError::Dimension {
                expected: 3,
                actual: 5
            })
        ));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn estimate_tokens_never_exceeds_char_count(text in ".{0,200}") {
            prop_assert!(estimate_tokens(&text) <= text.chars().count());
        }
    }
}
