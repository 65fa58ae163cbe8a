//! Process-local vector index. Contents are lost on restart.

use crate::models::{IndexedPoint, ScoredPoint};
use crate::traits::VectorIndex;
use crate::RagError;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::cmp::Ordering;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    dimensions: RwLock<Option<usize>>,
    /// Keyed by point id; insertion order breaks score ties.
    points: RwLock<IndexMap<String, IndexedPoint>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn check_dimensions(&self, actual: usize) -> Result<(), RagError> {
        match *self.dimensions.read().await {
            Some(expected) if expected != actual => Err(RagError::Configuration(format!(
                "vector dimension {actual} != collection dimension {expected}"
            ))),
            _ => Ok(()),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), RagError> {
        let mut configured = self.dimensions.write().await;
        match *configured {
            Some(existing) if existing != dimensions => Err(RagError::Configuration(format!(
                "collection dimension {existing} != requested {dimensions}"
            ))),
            _ => {
                *configured = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: Vec<IndexedPoint>) -> Result<(), RagError> {
        for point in &points {
            self.check_dimensions(point.vector.len()).await?;
        }

        let mut stored = self.points.write().await;
        for point in points {
            stored.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, RagError> {
        self.check_dimensions(vector.len()).await?;

        let stored = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = stored
            .values()
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(&point.vector, vector),
                payload: point.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}
