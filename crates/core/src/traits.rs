use crate::error::BackendError;
use crate::models::{Fragment, RetrievalResult};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct CollectionStats {
    pub count: u64,
    pub dimension: usize,
}

/// Similarity-search abstraction over a vector database. Owns the
/// collection lifecycle; the dimensionality is fixed at creation and only an
/// explicit [`clear`](VectorIndex::clear) may change it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection if absent; verifies the stored dimensionality
    /// if present. A mismatch is reported as
    /// [`BackendError::DimensionMismatch`], never silently resolved.
    async fn ensure_collection(&self, dimension: usize) -> Result<(), BackendError>;

    /// Upserts fragments with fresh unique identifiers, in bounded batches.
    /// A failed batch is logged and the remaining batches continue.
    async fn add(&self, fragments: &[Fragment], vectors: &[Vec<f32>]) -> Result<(), BackendError>;

    /// Cosine nearest neighbors, descending score.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, BackendError>;

    /// Destroys and recreates the collection. Full reindex only.
    async fn clear(&self) -> Result<(), BackendError>;

    async fn stats(&self) -> Result<CollectionStats, BackendError>;
}

#[async_trait]
impl<V: VectorIndex + ?Sized> VectorIndex for std::sync::Arc<V> {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), BackendError> {
        (**self).ensure_collection(dimension).await
    }

    async fn add(&self, fragments: &[Fragment], vectors: &[Vec<f32>]) -> Result<(), BackendError> {
        (**self).add(fragments, vectors).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, BackendError> {
        (**self).search(query_vector, top_k).await
    }

    async fn clear(&self) -> Result<(), BackendError> {
        (**self).clear().await
    }

    async fn stats(&self) -> Result<CollectionStats, BackendError> {
        (**self).stats().await
    }
}
