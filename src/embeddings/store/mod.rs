
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{RecipeError, Result};

/// Vector for one recipe version, as written by the queue processor.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub version_id: i64,
    pub recipe_id: i64,
    pub vector: Vec<f32>,
    /// Whether the version was still current when the vector was produced.
    pub is_current: bool,
}

/// Stored embedding metadata, without the vector itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingEntry {
    pub version_id: i64,
    pub recipe_id: i64,
    pub is_current: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub version_id: i64,
    pub recipe_id: i64,
    /// Cosine similarity, higher is closer.
    pub similarity: f32,
}

/// Persistence for per-version embeddings.
///
/// At most one embedding per recipe carries `is_current = true`. Superseded
/// embeddings are flagged, never deleted.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert or replace the embedding for `record.version_id`.
    ///
    /// When the record is current, every other current embedding of the same
    /// recipe is flipped to not-current.
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Current embeddings ordered by descending similarity, keeping only hits at
    /// or above `threshold`.
    async fn similarity_search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityHit>>;

    async fn get(&self, version_id: i64) -> Result<Option<EmbeddingEntry>>;

    async fn list_current(&self) -> Result<Vec<EmbeddingEntry>>;

    async fn count(&self) -> Result<usize>;

    /// Compact storage. Stores without on-disk files do nothing.
    async fn optimize(&self) -> Result<()> {
        Ok(())
    }
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[derive(Debug, Clone)]
struct StoredVector {
    entry: EmbeddingEntry,
    vector: Vec<f32>,
}

/// Brute-force in-memory [`EmbeddingStore`] used by tests and scenario runs.
#[derive(Debug, Default)]
pub struct MemoryEmbeddingStore {
    dimension: Option<usize>,
    vectors: RwLock<Vec<StoredVector>>,
}

impl MemoryEmbeddingStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors whose length differs from `dimension`.
    #[inline]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            vectors: RwLock::default(),
        }
    }
}

#[async_trait]
impl EmbeddingStore for MemoryEmbeddingStore {
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        if let Some(dimension) = self.dimension {
            if record.vector.len() != dimension {
                return Err(RecipeError::Embedding(format!(
                    "vector has {} dimensions, expected {dimension}",
                    record.vector.len()
                )));
            }
        }

        let mut vectors = self.vectors.write().await;
        vectors.retain(|stored| stored.entry.version_id != record.version_id);
        if record.is_current {
            for stored in vectors
                .iter_mut()
                .filter(|stored| stored.entry.recipe_id == record.recipe_id)
            {
                stored.entry.is_current = false;
            }
        }
        vectors.push(StoredVector {
            entry: EmbeddingEntry {
                version_id: record.version_id,
                recipe_id: record.recipe_id,
                is_current: record.is_current,
                created_at: Utc::now().to_rfc3339(),
            },
            vector: record.vector.clone(),
        });
        debug!(
            "Stored embedding for version {} (current: {})",
            record.version_id, record.is_current
        );
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityHit>> {
        let vectors = self.vectors.read().await;
        let mut hits: Vec<SimilarityHit> = vectors
            .iter()
            .filter(|stored| stored.entry.is_current)
            .map(|stored| SimilarityHit {
                version_id: stored.entry.version_id,
                recipe_id: stored.entry.recipe_id,
                similarity: cosine_similarity(query, &stored.vector),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get(&self, version_id: i64) -> Result<Option<EmbeddingEntry>> {
        let vectors = self.vectors.read().await;
        Ok(vectors
            .iter()
            .find(|stored| stored.entry.version_id == version_id)
            .map(|stored| stored.entry.clone()))
    }

    async fn list_current(&self) -> Result<Vec<EmbeddingEntry>> {
        let vectors = self.vectors.read().await;
        Ok(vectors
            .iter()
            .filter(|stored| stored.entry.is_current)
            .map(|stored| stored.entry.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.vectors.read().await.len())
    }
}
