// Embeddings module
// Text to fixed-length vectors, behind a trait so pipelines can take fakes

pub mod openai;

use async_trait::async_trait;

use crate::Result;

pub use openai::OpenAiClient;

/// Output size of `text-embedding-ada-002`
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one non-blank piece of text.
    ///
    /// Implementations return [`crate::RagError::EmbeddingService`] for blank
    /// input, transport failures, and vectors of the wrong length.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;
}
