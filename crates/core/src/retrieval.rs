use crate::models::{validate_top_k, SearchResult};
use crate::traits::{Embedder, VectorIndex};
use crate::RagError;
use std::sync::Arc;
use tracing::{error, info};

/// Question → query vector → nearest chunks, in the store's ranking.
pub struct RetrievalPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// An empty result means nothing to ground an answer on; it is not an error.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>, RagError> {
        validate_top_k(top_k)?;
        let question_chars = question.chars().count();

        let vector = self.embedder.embed_query(question).await.inspect_err(|error| {
            error!(code = error.code(), %error, question_chars, "query embedding failed");
        })?;
        if vector.len() != self.embedder.dimensions() {
            return Err(RagError::Embedding(format!(
                "query embedding dimension {} != {}",
                vector.len(),
                self.embedder.dimensions()
            )));
        }

        let hits = self.index.search(&vector, top_k).await.inspect_err(|error| {
            error!(code = error.code(), %error, top_k, "vector search failed");
        })?;

        let results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();
        info!(top_k, hits = results.len(), question_chars, "retrieved chunks");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scored, FakeEmbedder, FakeIndex};

    #[tokio::test]
    async fn store_order_is_preserved() -> Result<(), RagError> {
        let index = Arc::new(FakeIndex::with_hits(vec![
            scored("a", 0.9, "first"),
            scored("b", 0.7, "second"),
            scored("c", 0.5, "third"),
        ]));
        let pipeline = RetrievalPipeline::new(Arc::new(FakeEmbedder::new(8)), index.clone());

        let results = pipeline.retrieve("what is X?", 3).await?;

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(scores, vec![0.9, 0.7, 0.5]);
        assert_eq!(results[1].text, "second");
        assert_eq!(index.last_limit(), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn store_order_wins_even_when_scores_are_not_sorted() -> Result<(), RagError> {
        let index = Arc::new(FakeIndex::with_hits(vec![
            scored("low", 0.2, "x"),
            scored("high", 0.8, "y"),
        ]));
        let pipeline = RetrievalPipeline::new(Arc::new(FakeEmbedder::new(8)), index);

        let results = pipeline.retrieve("q", 2).await?;
        assert_eq!(results[0].chunk_id, "low");
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_is_not_an_error() -> Result<(), RagError> {
        let pipeline =
            RetrievalPipeline::new(Arc::new(FakeEmbedder::new(8)), Arc::new(FakeIndex::default()));
        assert!(pipeline.retrieve("anything", 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn top_k_outside_bounds_is_rejected_before_embedding() {
        let embedder = Arc::new(FakeEmbedder::new(8));
        let pipeline = RetrievalPipeline::new(embedder.clone(), Arc::new(FakeIndex::default()));

        assert!(matches!(pipeline.retrieve("q", 0).await, Err(RagError::Validation(_))));
        assert!(matches!(pipeline.retrieve("q", 11).await, Err(RagError::Validation(_))));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_skips_search() {
        let index = Arc::new(FakeIndex::default());
        let pipeline = RetrievalPipeline::new(Arc::new(FakeEmbedder::failing(8)), index.clone());

        assert!(matches!(pipeline.retrieve("q", 3).await, Err(RagError::Embedding(_))));
        assert_eq!(index.search_calls(), 0);
    }
}
