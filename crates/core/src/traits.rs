use crate::models::{IndexedEmbedding, IndexedPoint, Prompt, ScoredPoint};
use crate::RagError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Incremental answer text, one item per increment, in arrival order.
pub type TokenStream = BoxStream<'static, Result<String, RagError>>;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Embeds all texts in one call. Each vector carries the position of its input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, RagError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection when absent; fails when an existing one has another dimensionality.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), RagError>;

    /// Stores all points in one call and returns once the store acknowledged them.
    async fn upsert(&self, points: Vec<IndexedPoint>) -> Result<(), RagError>;

    /// Nearest points, most similar first.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, RagError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, RagError>;

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream, RagError>;
}
