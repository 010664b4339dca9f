//! Text embedding providers used to vectorize issues, comments, and queries.

pub mod any;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use any::AnyEmbedder;
pub use error::EmbedError;
pub use provider::{Embedder, estimate_tokens};
